//! The join-semilattice algebra the analysis runs on.
//!
//! Leaves first: features, origins, class intervals and call info feed
//! `Frame`; frames group into `KindFrames` (per class-interval context),
//! `LocalTaint` (per call info) and `Taint` (the principal domain);
//! `PathTree` indexes lattice values by access path, giving `TaintTree`
//! and `TaintAccessPathTree`.

pub mod call_info;
pub mod features;
pub mod frame;
pub mod interval;
pub mod kind_frames;
pub mod lattice;
pub mod local_taint;
pub mod origin;
pub mod path_tree;
pub mod taint;
pub mod taint_tree;

pub use call_info::{CallInfo, CallKind, PropagationHop};
pub use features::{Feature, FeatureMayAlwaysSet, FeatureSet};
pub use frame::{ExtraTrace, Frame};
pub use interval::{CallClassIntervalContext, ClassInterval};
pub use kind_frames::{CallSiteContext, KindFrames};
pub use lattice::{AbstractDomain, ConstantDomain, UpdateKind};
pub use local_taint::LocalTaint;
pub use origin::{CanonicalName, CanonicalNameSet, Origin, OriginSet};
pub use path_tree::{CollapseDepth, PathTree};
pub use taint::Taint;
pub use taint_tree::{TaintAccessPathTree, TaintTree};
