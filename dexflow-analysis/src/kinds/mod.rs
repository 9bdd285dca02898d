//! Taint kinds and transform lists, hash-consed.
//!
//! Handle equality is semantic equality: every factory returns stable
//! interned handles, so kind comparisons in the hot propagation loops
//! are pointer comparisons.

pub mod kind;
pub mod transforms;

pub use kind::{Kind, KindFactory, KindHandle};
pub use transforms::{
    SanitizerKind, Transform, TransformDirection, TransformHandle, TransformList,
    TransformListHandle, TransformsFactory,
};
