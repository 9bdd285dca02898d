//! Model JSON: the symmetric dump/load format and the user-facing
//! configuration schema.
//!
//! Dumped models normalize: object keys are sorted, bottoms are elided,
//! arrays are emitted in deterministic order, so re-dumping a loaded
//! model is byte-identical.

use rustc_hash::FxHashSet;
use serde_json::{json, Map, Value};
use smallvec::SmallVec;

use dexflow_core::config::ExportOriginsMode;
use dexflow_core::errors::ModelValidationError;

use super::issue::{Issue, IssueSet};
use super::model::{FreezeKind, Mode, Model, SetterAccessPath};
use super::taint_config::{PropagationConfig, Sanitizer, TaintConfig};
use crate::access::{AccessPath, Root};
use crate::context::AnalysisContext;
use crate::domains::{
    AbstractDomain, CallClassIntervalContext, CallInfo, CallKind, CanonicalName,
    CanonicalNameSet, ClassInterval, CollapseDepth, ConstantDomain,
    FeatureMayAlwaysSet, FeatureSet, Frame, Origin, OriginSet, PathTree,
    PropagationHop, Taint, TaintAccessPathTree, UpdateKind,
};
use crate::ir::{Fields, Methods, PositionHandle};
use crate::kinds::{Kind, KindHandle, SanitizerKind, TransformList};

type JsonResult<T> = Result<T, ModelValidationError>;

fn malformed(method: &str, message: impl Into<String>) -> ModelValidationError {
    ModelValidationError::MalformedJson {
        method: method.to_string(),
        message: message.into(),
    }
}

fn string_member(value: &Value, key: &str, method: &str) -> JsonResult<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| malformed(method, format!("missing string member `{key}`")))
}

// Kinds.

pub fn kind_to_json(kind: KindHandle, context: &AnalysisContext) -> Value {
    match &*kind {
        Kind::Named(name) => json!(context.strings.resolve(name)),
        Kind::Partial { base, label } => json!({
            "partial": {
                "base": context.strings.resolve(base),
                "label": context.strings.resolve(label),
            }
        }),
        Kind::Triggered {
            base,
            label,
            rule_code,
        } => json!({
            "triggered": {
                "base": context.strings.resolve(base),
                "label": context.strings.resolve(label),
                "rule": rule_code,
            }
        }),
        Kind::Transform {
            base,
            local_transforms,
            global_transforms,
        } => {
            let lists = |list: &Option<crate::kinds::TransformListHandle>| {
                list.map(|list| {
                    list.iter()
                        .map(|transform| json!(transform.to_string_with(&context.strings)))
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
            };
            json!({
                "base": kind_to_json(*base, context),
                "local_transforms": lists(local_transforms),
                "global_transforms": lists(global_transforms),
            })
        }
        Kind::Propagation(root) => json!(format!("Propagation:{root}")),
        Kind::LocalReturn => json!("LocalReturn"),
        Kind::LocalArgument(position) => json!(format!("LocalArgument({position})")),
        Kind::Receiver => json!("Receiver"),
        Kind::LocalResult => json!("LocalResult"),
    }
}

pub fn kind_from_json(
    value: &Value,
    context: &AnalysisContext,
    method: &str,
) -> JsonResult<KindHandle> {
    match value {
        Value::String(name) => Ok(parse_kind_string(name, context)),
        Value::Object(object) => {
            if let Some(partial) = object.get("partial") {
                let base = string_member(partial, "base", method)?;
                let label = string_member(partial, "label", method)?;
                Ok(context.kinds.partial(context.str(&base), context.str(&label)))
            } else if let Some(triggered) = object.get("triggered") {
                let base = string_member(triggered, "base", method)?;
                let label = string_member(triggered, "label", method)?;
                let rule = triggered
                    .get("rule")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| malformed(method, "triggered kind without rule"))?;
                Ok(context.kinds.triggered(
                    context.str(&base),
                    context.str(&label),
                    rule as i32,
                ))
            } else if let Some(base) = object.get("base") {
                let base = kind_from_json(base, context, method)?;
                let local = transform_list_from_json(
                    object.get("local_transforms"),
                    context,
                    method,
                )?;
                let global = transform_list_from_json(
                    object.get("global_transforms"),
                    context,
                    method,
                )?;
                Ok(context.kinds.transform_kind(base, local, global))
            } else {
                Err(malformed(method, "unrecognized kind object"))
            }
        }
        _ => Err(malformed(method, "kind must be a string or object")),
    }
}

fn parse_kind_string(name: &str, context: &AnalysisContext) -> KindHandle {
    match name {
        "LocalReturn" => context.kinds.local_return(),
        "Receiver" => context.kinds.receiver(),
        "LocalResult" => context.kinds.local_result(),
        _ => {
            if let Some(inner) = name
                .strip_prefix("LocalArgument(")
                .and_then(|rest| rest.strip_suffix(')'))
            {
                if let Ok(position) = inner.parse() {
                    return context.kinds.local_argument(position);
                }
            }
            if let Some(root) = name
                .strip_prefix("Propagation:")
                .and_then(Root::parse)
            {
                return context.kinds.propagation(root);
            }
            context.kinds.named(context.str(name))
        }
    }
}

fn transform_list_from_json(
    value: Option<&Value>,
    context: &AnalysisContext,
    method: &str,
) -> JsonResult<Option<crate::kinds::TransformListHandle>> {
    let Some(value) = value else {
        return Ok(None);
    };
    let array = value
        .as_array()
        .ok_or_else(|| malformed(method, "transform list must be an array"))?;
    let transforms = array
        .iter()
        .map(|entry| {
            entry
                .as_str()
                .map(|name| context.transforms.named(context.str(name)))
                .ok_or_else(|| malformed(method, "transform must be a string"))
        })
        .collect::<JsonResult<Vec<_>>>()?;
    Ok(context.transforms.create(TransformList::new(transforms)))
}

// Features, positions, origins.

fn feature_set_to_json(features: &FeatureSet, context: &AnalysisContext) -> Value {
    json!(features.sorted_names(&context.strings))
}

fn feature_set_from_json(
    value: &Value,
    context: &AnalysisContext,
    method: &str,
) -> JsonResult<FeatureSet> {
    let array = value
        .as_array()
        .ok_or_else(|| malformed(method, "features must be an array"))?;
    let mut features = FeatureSet::bottom();
    for entry in array {
        let name = entry
            .as_str()
            .ok_or_else(|| malformed(method, "feature must be a string"))?;
        features.add(context.feature(name));
    }
    Ok(features)
}

fn may_always_to_json(features: &FeatureMayAlwaysSet, context: &AnalysisContext) -> Value {
    json!({
        "always": feature_set_to_json(features.always(), context),
        "may": feature_set_to_json(features.may(), context),
    })
}

fn may_always_from_json(
    value: &Value,
    context: &AnalysisContext,
    method: &str,
) -> JsonResult<FeatureMayAlwaysSet> {
    let always = feature_set_from_json(
        value.get("always").unwrap_or(&json!([])),
        context,
        method,
    )?;
    let may = feature_set_from_json(value.get("may").unwrap_or(&json!([])), context, method)?;
    let mut result = FeatureMayAlwaysSet::make_always(always);
    result.add_may(&may);
    Ok(result)
}

fn position_to_json(position: PositionHandle) -> Value {
    json!({ "line": position.line(), "path": position.path() })
}

fn position_from_json(
    value: &Value,
    context: &AnalysisContext,
    method: &str,
) -> JsonResult<PositionHandle> {
    let path = value
        .get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(method, "position without path"))?;
    let line = value
        .get("line")
        .and_then(Value::as_u64)
        .ok_or_else(|| malformed(method, "position without line"))? as u32;
    Ok(context.positions.get(path, line))
}

fn origin_to_json(origin: Origin, context: &AnalysisContext) -> Value {
    match origin {
        Origin::Method { method, port } => json!({
            "method": method.signature(),
            "port": port.to_string_with(&context.strings),
        }),
        Origin::Field(field) => json!({ "field": field.signature() }),
        Origin::Crtex {
            canonical_name,
            port,
        } => json!({
            "canonical_name": context.strings.resolve(&canonical_name),
            "port": port.to_string_with(&context.strings),
        }),
        Origin::Literal(value) => json!({ "literal": context.strings.resolve(&value) }),
    }
}

fn origin_from_json(
    value: &Value,
    context: &AnalysisContext,
    methods: &Methods,
    fields: &Fields,
    method: &str,
) -> JsonResult<Origin> {
    if let Some(signature) = value.get("method").and_then(Value::as_str) {
        let handle = methods
            .get(signature)
            .ok_or_else(|| malformed(method, format!("unknown method `{signature}`")))?;
        let port = port_from_json(value.get("port"), context, method)?;
        return Ok(Origin::Method {
            method: handle,
            port: context.access_paths.get(port),
        });
    }
    if let Some(signature) = value.get("field").and_then(Value::as_str) {
        let (class, name) = signature
            .rsplit_once('.')
            .ok_or_else(|| malformed(method, "malformed field signature"))?;
        return Ok(Origin::Field(fields.get(class, name)));
    }
    if let Some(name) = value.get("canonical_name").and_then(Value::as_str) {
        let port = port_from_json(value.get("port"), context, method)?;
        return Ok(Origin::Crtex {
            canonical_name: context.str(name),
            port: context.access_paths.get(port),
        });
    }
    if let Some(literal) = value.get("literal").and_then(Value::as_str) {
        return Ok(Origin::Literal(context.str(literal)));
    }
    Err(malformed(method, "unrecognized origin"))
}

fn port_from_json(
    value: Option<&Value>,
    context: &AnalysisContext,
    method: &str,
) -> JsonResult<AccessPath> {
    let syntax = value
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(method, "missing port"))?;
    AccessPath::parse(syntax, &context.strings)
        .ok_or_else(|| malformed(method, format!("invalid port `{syntax}`")))
}

// Frames and taint.

fn interval_to_json(interval: CallClassIntervalContext) -> Value {
    json!({
        "hi": interval.callee_interval().hi(),
        "lo": interval.callee_interval().lo(),
        "preserves_type_context": interval.preserves_type_context(),
    })
}

fn interval_from_json(value: &Value) -> CallClassIntervalContext {
    let lo = value.get("lo").and_then(Value::as_u64).unwrap_or(0) as u32;
    let hi = value
        .get("hi")
        .and_then(Value::as_u64)
        .unwrap_or(u32::MAX as u64) as u32;
    let preserves = value
        .get("preserves_type_context")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    CallClassIntervalContext::new(ClassInterval::new(lo, hi), preserves)
}

fn output_paths_to_json(paths: &PathTree<CollapseDepth>, context: &AnalysisContext) -> Value {
    let mut entries: Vec<Value> = paths
        .elements()
        .into_iter()
        .filter_map(|(path, depth)| {
            depth.value().map(|depth| {
                json!({
                    "depth": depth,
                    "path": path.to_string_with(&context.strings),
                })
            })
        })
        .collect();
    entries.sort_by_key(|value| value.to_string());
    json!(entries)
}

fn output_paths_from_json(
    value: Option<&Value>,
    context: &AnalysisContext,
    method: &str,
) -> JsonResult<PathTree<CollapseDepth>> {
    let Some(array) = value.and_then(Value::as_array) else {
        return Ok(PathTree::bottom());
    };
    let mut tree = PathTree::bottom();
    for entry in array {
        let syntax = entry
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed(method, "output path without path"))?;
        let depth = entry
            .get("depth")
            .and_then(Value::as_u64)
            .ok_or_else(|| malformed(method, "output path without depth"))?
            as u32;
        // Paths are serialized without a root; reuse the parser with a
        // synthetic one.
        let access_path = AccessPath::parse(&format!("Return{syntax}"), &context.strings)
            .ok_or_else(|| malformed(method, format!("invalid path `{syntax}`")))?;
        tree.write(
            access_path.path(),
            CollapseDepth::new(depth),
            UpdateKind::Weak,
        );
    }
    Ok(tree)
}

fn frame_to_json(frame: &Frame, call_kind: CallKind, context: &AnalysisContext) -> Value {
    let export_origins = match context.options.export_origins_mode {
        ExportOriginsMode::Always => true,
        ExportOriginsMode::OnlyOnOrigins => {
            call_kind.is_origin() || call_kind.is_declaration()
        }
    };
    let mut object = Map::new();
    if !frame.canonical_names().is_bottom() {
        let mut names: Vec<Value> = frame
            .canonical_names()
            .iter()
            .map(|name| match name {
                CanonicalName::Template(value) => {
                    json!({ "template": context.strings.resolve(&value) })
                }
                CanonicalName::Instantiated(value) => {
                    json!({ "instantiated": context.strings.resolve(&value) })
                }
            })
            .collect();
        names.sort_by_key(|value| value.to_string());
        object.insert("canonical_names".to_string(), json!(names));
    }
    if frame.distance() > 0 {
        object.insert("distance".to_string(), json!(frame.distance()));
    }
    let features = frame.inferred_features();
    if !features.is_bottom() && !features.is_empty() {
        object.insert(
            "features".to_string(),
            may_always_to_json(features, context),
        );
    }
    if !frame.class_interval_context().is_default() {
        object.insert(
            "interval".to_string(),
            interval_to_json(frame.class_interval_context()),
        );
    }
    object.insert(
        "kind".to_string(),
        kind_to_json(frame.kind().expect("serializing bottom frame"), context),
    );
    if export_origins && !frame.origins().is_empty() {
        let mut origins: Vec<Value> = frame
            .origins()
            .iter()
            .map(|origin| origin_to_json(origin, context))
            .collect();
        origins.sort_by_key(|value| value.to_string());
        object.insert("origins".to_string(), json!(origins));
    }
    if !frame.output_paths().is_bottom() {
        object.insert(
            "output_paths".to_string(),
            output_paths_to_json(frame.output_paths(), context),
        );
    }
    if !frame.user_features().is_empty() {
        object.insert(
            "user_features".to_string(),
            feature_set_to_json(frame.user_features(), context),
        );
    }
    if !frame.via_type_of_ports().is_empty() {
        let mut ports: Vec<String> = frame
            .via_type_of_ports()
            .iter()
            .map(Root::to_string)
            .collect();
        ports.sort_unstable();
        object.insert("via_type_of".to_string(), json!(ports));
    }
    if !frame.via_value_of_ports().is_empty() {
        let mut ports: Vec<String> = frame
            .via_value_of_ports()
            .iter()
            .map(Root::to_string)
            .collect();
        ports.sort_unstable();
        object.insert("via_value_of".to_string(), json!(ports));
    }
    Value::Object(object)
}

fn frame_from_json(
    value: &Value,
    context: &AnalysisContext,
    methods: &Methods,
    fields: &Fields,
    method: &str,
) -> JsonResult<Frame> {
    let kind = kind_from_json(
        value
            .get("kind")
            .ok_or_else(|| malformed(method, "frame without kind"))?,
        context,
        method,
    )?;
    let distance = value.get("distance").and_then(Value::as_u64).unwrap_or(0) as u32;
    let interval = value
        .get("interval")
        .map(interval_from_json)
        .unwrap_or_default();
    let inferred_features = match value.get("features") {
        Some(features) => may_always_from_json(features, context, method)?,
        None => FeatureMayAlwaysSet::bottom(),
    };
    let user_features = match value.get("user_features") {
        Some(features) => feature_set_from_json(features, context, method)?,
        None => FeatureSet::bottom(),
    };
    let mut origins = OriginSet::bottom();
    if let Some(array) = value.get("origins").and_then(Value::as_array) {
        for entry in array {
            origins.add(origin_from_json(entry, context, methods, fields, method)?);
        }
    }
    let mut canonical_names = CanonicalNameSet::bottom();
    if let Some(array) = value.get("canonical_names").and_then(Value::as_array) {
        for entry in array {
            if let Some(template) = entry.get("template").and_then(Value::as_str) {
                canonical_names.add(CanonicalName::Template(context.str(template)));
            } else if let Some(instantiated) =
                entry.get("instantiated").and_then(Value::as_str)
            {
                canonical_names.add(CanonicalName::Instantiated(context.str(instantiated)));
            } else {
                return Err(malformed(method, "unrecognized canonical name"));
            }
        }
    }
    let ports_from = |key: &str| -> JsonResult<SmallVec<[Root; 2]>> {
        let mut ports = SmallVec::new();
        if let Some(array) = value.get(key).and_then(Value::as_array) {
            for entry in array {
                let root = entry
                    .as_str()
                    .and_then(Root::parse)
                    .ok_or_else(|| malformed(method, format!("invalid root in {key}")))?;
                ports.push(root);
            }
        }
        Ok(ports)
    };
    let output_paths = output_paths_from_json(value.get("output_paths"), context, method)?;

    Ok(Frame::new(
        kind,
        interval,
        distance,
        origins,
        inferred_features,
        user_features,
        ports_from("via_type_of")?,
        ports_from("via_value_of")?,
        canonical_names,
        output_paths,
        FxHashSet::default(),
    ))
}

fn call_info_to_json(call_info: &CallInfo, context: &AnalysisContext) -> Value {
    let mut object = Map::new();
    if let Some(callee) = call_info.callee() {
        object.insert("callee".to_string(), json!(callee.signature()));
    }
    object.insert("kind".to_string(), json!(call_info.call_kind().as_str()));
    object.insert(
        "port".to_string(),
        json!(call_info.callee_port().to_string_with(&context.strings)),
    );
    if let Some(position) = call_info.call_position() {
        object.insert("position".to_string(), position_to_json(position));
    }
    Value::Object(object)
}

fn call_kind_from_name(name: &str) -> Option<CallKind> {
    Some(match name {
        "declaration" => CallKind::Declaration,
        "origin" => CallKind::Origin,
        "call_site" => CallKind::CallSite,
        "propagation" => CallKind::Propagation,
        "propagation_with_trace:declaration" => {
            CallKind::PropagationWithTrace(PropagationHop::Declaration)
        }
        "propagation_with_trace:origin" => {
            CallKind::PropagationWithTrace(PropagationHop::Origin)
        }
        "propagation_with_trace:call_site" => {
            CallKind::PropagationWithTrace(PropagationHop::CallSite)
        }
        "propagation_without_trace" => CallKind::PropagationWithoutTrace,
        _ => return None,
    })
}

fn call_info_from_json(
    value: &Value,
    context: &AnalysisContext,
    methods: &Methods,
    method: &str,
) -> JsonResult<CallInfo> {
    let call_kind = value
        .get("kind")
        .and_then(Value::as_str)
        .and_then(call_kind_from_name)
        .ok_or_else(|| malformed(method, "call info without kind"))?;
    let callee = match value.get("callee").and_then(Value::as_str) {
        Some(signature) => Some(
            methods
                .get(signature)
                .ok_or_else(|| malformed(method, format!("unknown callee `{signature}`")))?,
        ),
        None => None,
    };
    let port = port_from_json(value.get("port"), context, method)?;
    let position = match value.get("position") {
        Some(position) => Some(position_from_json(position, context, method)?),
        None => None,
    };
    Ok(CallInfo::new(
        callee,
        call_kind,
        context.access_paths.get(port),
        position,
    ))
}

pub fn taint_to_json(taint: &Taint, context: &AnalysisContext) -> Value {
    let mut locals: Vec<Value> = taint
        .locals()
        .map(|local| {
            let mut object = Map::new();
            object.insert(
                "call".to_string(),
                call_info_to_json(local.call_info().expect("non-bottom local taint"), context),
            );
            let mut frames: Vec<Value> = Vec::new();
            local.visit_frames(|call_info, frame| {
                frames.push(frame_to_json(frame, call_info.call_kind(), context))
            });
            frames.sort_by_key(|value| value.to_string());
            object.insert("kinds".to_string(), json!(frames));
            let local_features = local.locally_inferred_features();
            if !local_features.is_bottom() && !local_features.is_empty() {
                object.insert(
                    "local_features".to_string(),
                    may_always_to_json(local_features, context),
                );
            }
            if !local.local_positions().is_empty() {
                let mut positions: Vec<Value> = local
                    .local_positions()
                    .iter()
                    .map(|position| position_to_json(*position))
                    .collect();
                positions.sort_by_key(|value| value.to_string());
                object.insert("local_positions".to_string(), json!(positions));
            }
            Value::Object(object)
        })
        .collect();
    locals.sort_by_key(|value| value.to_string());
    json!(locals)
}

pub fn taint_from_json(
    value: &Value,
    context: &AnalysisContext,
    methods: &Methods,
    fields: &Fields,
    method: &str,
) -> JsonResult<Taint> {
    let array = value
        .as_array()
        .ok_or_else(|| malformed(method, "taint must be an array"))?;
    let mut taint = Taint::bottom();
    for entry in array {
        let call_info = call_info_from_json(
            entry
                .get("call")
                .ok_or_else(|| malformed(method, "taint without call info"))?,
            context,
            methods,
            method,
        )?;
        let mut local = crate::domains::LocalTaint::bottom();
        let frames = entry
            .get("kinds")
            .and_then(Value::as_array)
            .ok_or_else(|| malformed(method, "taint without kinds"))?;
        for frame in frames {
            let frame = frame_from_json(frame, context, methods, fields, method)?;
            if local.is_bottom() {
                local = crate::domains::LocalTaint::from_frame(call_info, frame);
            } else {
                local.add(frame);
            }
        }
        if let Some(features) = entry.get("local_features") {
            local.add_locally_inferred_features(&may_always_from_json(
                features, context, method,
            )?);
        }
        if let Some(positions) = entry.get("local_positions").and_then(Value::as_array) {
            for position in positions {
                local.add_local_position(position_from_json(position, context, method)?);
            }
        }
        taint.add_local(local);
    }
    Ok(taint)
}

// Trees.

fn tree_to_json(
    tree: &TaintAccessPathTree,
    context: &AnalysisContext,
) -> Value {
    let mut entries: Vec<(String, Value)> = tree
        .elements()
        .into_iter()
        .map(|(access_path, taint)| {
            (
                access_path.to_string_with(&context.strings),
                taint_to_json(&taint, context),
            )
        })
        .collect();
    // Interning order differs between parallel runs; port strings give
    // the stable order the idempotence guarantee needs.
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    let entries: Vec<Value> = entries
        .into_iter()
        .map(|(port, taint)| json!({ "port": port, "taint": taint }))
        .collect();
    json!(entries)
}

fn tree_from_json(
    value: &Value,
    context: &AnalysisContext,
    methods: &Methods,
    fields: &Fields,
    method: &str,
) -> JsonResult<TaintAccessPathTree> {
    let array = value
        .as_array()
        .ok_or_else(|| malformed(method, "tree must be an array"))?;
    let mut tree = TaintAccessPathTree::bottom();
    for entry in array {
        let port = port_from_json(entry.get("port"), context, method)?;
        let taint = taint_from_json(
            entry
                .get("taint")
                .ok_or_else(|| malformed(method, "tree entry without taint"))?,
            context,
            methods,
            fields,
            method,
        )?;
        tree.write(&port, taint, UpdateKind::Weak);
    }
    Ok(tree)
}

// Sanitizers.

fn sanitizer_kind_name(kind: SanitizerKind) -> &'static str {
    match kind {
        SanitizerKind::Sources => "sources",
        SanitizerKind::Sinks => "sinks",
        SanitizerKind::Propagations => "propagations",
    }
}

fn sanitizer_kind_from_name(name: &str) -> Option<SanitizerKind> {
    Some(match name {
        "sources" => SanitizerKind::Sources,
        "sinks" => SanitizerKind::Sinks,
        "propagations" => SanitizerKind::Propagations,
        _ => return None,
    })
}

fn sanitizer_to_json(sanitizer: &Sanitizer, context: &AnalysisContext) -> Value {
    let mut object = Map::new();
    if let Some(kinds) = &sanitizer.kinds {
        let mut names: Vec<Value> = kinds
            .iter()
            .map(|kind| kind_to_json(*kind, context))
            .collect();
        names.sort_by_key(|value| value.to_string());
        object.insert("kinds".to_string(), json!(names));
    }
    object.insert(
        "sanitize".to_string(),
        json!(sanitizer_kind_name(sanitizer.sanitizer_kind)),
    );
    Value::Object(object)
}

fn sanitizer_from_json(
    value: &Value,
    context: &AnalysisContext,
    method: &str,
) -> JsonResult<Sanitizer> {
    let sanitizer_kind = value
        .get("sanitize")
        .and_then(Value::as_str)
        .and_then(sanitizer_kind_from_name)
        .ok_or_else(|| malformed(method, "sanitizer without sanitize member"))?;
    let kinds = match value.get("kinds") {
        Some(kinds) => {
            let array = kinds
                .as_array()
                .ok_or_else(|| malformed(method, "sanitizer kinds must be an array"))?;
            Some(
                array
                    .iter()
                    .map(|kind| kind_from_json(kind, context, method))
                    .collect::<JsonResult<_>>()?,
            )
        }
        None => None,
    };
    Ok(Sanitizer {
        sanitizer_kind,
        kinds,
    })
}

// Issues.

fn issue_to_json(issue: &Issue, context: &AnalysisContext) -> Value {
    let mut object = Map::new();
    object.insert("callee".to_string(), json!(issue.callee));
    if let Some(position) = issue.position {
        object.insert("position".to_string(), position_to_json(position));
    }
    object.insert("rule".to_string(), json!(issue.rule_code));
    object.insert("sink_index".to_string(), json!(issue.sink_index));
    object.insert("sinks".to_string(), taint_to_json(&issue.sinks, context));
    object.insert(
        "sources".to_string(),
        taint_to_json(&issue.sources, context),
    );
    Value::Object(object)
}

fn issue_from_json(
    value: &Value,
    context: &AnalysisContext,
    methods: &Methods,
    fields: &Fields,
    method: &str,
) -> JsonResult<Issue> {
    Ok(Issue {
        sources: taint_from_json(
            value
                .get("sources")
                .ok_or_else(|| malformed(method, "issue without sources"))?,
            context,
            methods,
            fields,
            method,
        )?,
        sinks: taint_from_json(
            value
                .get("sinks")
                .ok_or_else(|| malformed(method, "issue without sinks"))?,
            context,
            methods,
            fields,
            method,
        )?,
        rule_code: value
            .get("rule")
            .and_then(Value::as_i64)
            .ok_or_else(|| malformed(method, "issue without rule"))? as i32,
        callee: value
            .get("callee")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed(method, "issue without callee"))?
            .to_string(),
        sink_index: value
            .get("sink_index")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        position: match value.get("position") {
            Some(position) => Some(position_from_json(position, context, method)?),
            None => None,
        },
    })
}

// Whole models.

/// Serialize a model; bottoms elided, keys sorted by `serde_json`'s
/// ordered maps.
pub fn model_to_json(model: &Model, context: &AnalysisContext) -> Value {
    let mut object = Map::new();
    if let Some(method) = model.method() {
        object.insert("method".to_string(), json!(method.signature()));
    }
    let modes: Vec<&str> = model.modes().iter().map(Mode::name).collect();
    if !modes.is_empty() {
        object.insert("modes".to_string(), json!(modes));
    }
    let freezes: Vec<&str> = model.frozen().iter().map(FreezeKind::name).collect();
    if !freezes.is_empty() {
        object.insert("freeze".to_string(), json!(freezes));
    }
    for (key, tree) in [
        ("generations", model.generations()),
        ("parameter_sources", model.parameter_sources()),
        ("sinks", model.sinks()),
        ("effect_sources", model.call_effect_sources()),
        ("effect_sinks", model.call_effect_sinks()),
        ("propagation", model.propagations()),
    ] {
        if !tree.is_bottom() {
            object.insert(key.to_string(), tree_to_json(tree, context));
        }
    }
    if !model.global_sanitizers().is_empty() {
        let mut sanitizers: Vec<Value> = model
            .global_sanitizers()
            .iter()
            .map(|sanitizer| sanitizer_to_json(sanitizer, context))
            .collect();
        sanitizers.sort_by_key(|value| value.to_string());
        object.insert("sanitizers".to_string(), json!(sanitizers));
    }
    if let Some(access_path) = model.inline_as_getter().value() {
        object.insert(
            "inline_as_getter".to_string(),
            json!(access_path.to_string_with(&context.strings)),
        );
    }
    if let Some(setter) = model.inline_as_setter().value() {
        object.insert(
            "inline_as_setter".to_string(),
            json!({
                "target": setter.target.to_string_with(&context.strings),
                "value": setter.value.to_string_with(&context.strings),
            }),
        );
    }
    if !model.model_generators().is_empty() {
        object.insert(
            "model_generators".to_string(),
            json!(model.model_generators()),
        );
    }
    if !model.issues().is_empty() {
        let issues: Vec<Value> = model
            .issues()
            .iter_sorted()
            .into_iter()
            .map(|issue| issue_to_json(issue, context))
            .collect();
        object.insert("issues".to_string(), json!(issues));
    }
    Value::Object(object)
}

/// Load a model from the symmetric dump format.
pub fn model_from_json(
    value: &Value,
    context: &AnalysisContext,
    methods: &Methods,
    fields: &Fields,
) -> JsonResult<Model> {
    let method_name = value
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or("<unknown>")
        .to_string();
    let method = match value.get("method").and_then(Value::as_str) {
        Some(signature) => Some(methods.get(signature).ok_or_else(|| {
            malformed(&method_name, format!("unknown method `{signature}`"))
        })?),
        None => None,
    };

    let mut model = Model::new(method);
    if let Some(modes) = value.get("modes").and_then(Value::as_array) {
        for mode in modes {
            let name = mode
                .as_str()
                .ok_or_else(|| malformed(&method_name, "mode must be a string"))?;
            let mode = Mode::from_name(name)
                .ok_or_else(|| malformed(&method_name, format!("unknown mode `{name}`")))?;
            model.add_mode(mode, context);
        }
    }
    if let Some(freezes) = value.get("freeze").and_then(Value::as_array) {
        for freeze in freezes {
            let name = freeze
                .as_str()
                .ok_or_else(|| malformed(&method_name, "freeze must be a string"))?;
            model.freeze(FreezeKind::from_name(name).ok_or_else(|| {
                malformed(&method_name, format!("unknown freeze `{name}`"))
            })?);
        }
    }

    let mut load_tree = |key: &str| -> JsonResult<Option<TaintAccessPathTree>> {
        match value.get(key) {
            Some(tree) => Ok(Some(tree_from_json(
                tree,
                context,
                methods,
                fields,
                &method_name,
            )?)),
            None => Ok(None),
        }
    };
    if let Some(tree) = load_tree("generations")? {
        model.set_generations(tree);
    }
    if let Some(tree) = load_tree("parameter_sources")? {
        model.set_parameter_sources(tree);
    }
    if let Some(tree) = load_tree("sinks")? {
        model.set_sinks(tree);
    }
    if let Some(tree) = load_tree("effect_sources")? {
        model.set_call_effect_sources(tree);
    }
    if let Some(tree) = load_tree("effect_sinks")? {
        model.set_call_effect_sinks(tree);
    }
    if let Some(tree) = load_tree("propagation")? {
        model.set_propagations(tree);
    }

    if let Some(sanitizers) = value.get("sanitizers").and_then(Value::as_array) {
        for sanitizer in sanitizers {
            model.add_global_sanitizer(sanitizer_from_json(
                sanitizer,
                context,
                &method_name,
            )?);
        }
    }
    if let Some(getter) = value.get("inline_as_getter").and_then(Value::as_str) {
        let access_path = AccessPath::parse(getter, &context.strings)
            .ok_or_else(|| malformed(&method_name, "invalid inline_as_getter"))?;
        model.set_inline_as_getter(ConstantDomain::Value(access_path));
    }
    if let Some(setter) = value.get("inline_as_setter") {
        let target = port_from_json(setter.get("target"), context, &method_name)?;
        let value_path = port_from_json(setter.get("value"), context, &method_name)?;
        model.set_inline_as_setter(ConstantDomain::Value(SetterAccessPath {
            target,
            value: value_path,
        }));
    }
    if let Some(generators) = value.get("model_generators").and_then(Value::as_array) {
        for generator in generators {
            if let Some(name) = generator.as_str() {
                model.add_model_generator(name);
            }
        }
    }
    if let Some(issues) = value.get("issues").and_then(Value::as_array) {
        let mut set = IssueSet::new();
        for issue in issues {
            set.add(issue_from_json(
                issue,
                context,
                methods,
                fields,
                &method_name,
            )?);
        }
        model.set_issues(set);
    }
    Ok(model)
}

const CONFIG_MEMBERS: &[&str] = &[
    "method",
    "field",
    "literal",
    "modes",
    "freeze",
    "generations",
    "parameter_sources",
    "sources",
    "sinks",
    "effect_sources",
    "effect_sinks",
    "propagation",
    "sanitizers",
    "attach_to_sources",
    "attach_to_sinks",
    "attach_to_propagations",
    "add_features_to_arguments",
];

/// Parse a user configuration entry. The schema is close to the dump
/// format but taint entries are flat `{ kind, port, features, ... }`
/// objects. Unknown members fail loudly when
/// `options.check_unexpected_members` is set.
pub fn model_from_config_json(
    method: Option<crate::ir::MethodHandle>,
    value: &Value,
    context: &AnalysisContext,
) -> JsonResult<Model> {
    let method_name = method
        .map(|method| method.signature())
        .unwrap_or_else(|| "<unknown>".to_string());

    if context.options.check_unexpected_members {
        if let Some(object) = value.as_object() {
            for key in object.keys() {
                if !CONFIG_MEMBERS.contains(&key.as_str()) {
                    return Err(ModelValidationError::UnexpectedMember {
                        method: method_name,
                        member: key.clone(),
                    });
                }
            }
        }
    }

    let mut model = Model::new(method);

    if let Some(modes) = value.get("modes").and_then(Value::as_array) {
        for mode in modes {
            let name = mode
                .as_str()
                .ok_or_else(|| malformed(&method_name, "mode must be a string"))?;
            let mode = Mode::from_name(name)
                .ok_or_else(|| malformed(&method_name, format!("unknown mode `{name}`")))?;
            model.add_mode(mode, context);
        }
    }
    if let Some(freezes) = value.get("freeze").and_then(Value::as_array) {
        for freeze in freezes {
            if let Some(kind) = freeze.as_str().and_then(FreezeKind::from_name) {
                model.freeze(kind);
            }
        }
    }

    let taint_config = |entry: &Value| -> JsonResult<(AccessPath, TaintConfig)> {
        let kind = kind_from_json(
            entry
                .get("kind")
                .ok_or_else(|| malformed(&method_name, "taint entry without kind"))?,
            context,
            &method_name,
        )?;
        let port = match entry.get("port") {
            Some(port) => port_from_json(Some(port), context, &method_name)?,
            None => AccessPath::from_root(Root::return_value()),
        };
        let mut config = TaintConfig::new(kind);
        if let Some(features) = entry.get("features") {
            config = config
                .with_features(feature_set_from_json(features, context, &method_name)?);
        }
        let roots = |key: &str| -> JsonResult<Vec<Root>> {
            let mut result = Vec::new();
            if let Some(array) = entry.get(key).and_then(Value::as_array) {
                for root in array {
                    result.push(root.as_str().and_then(Root::parse).ok_or_else(|| {
                        malformed(&method_name, format!("invalid root in {key}"))
                    })?);
                }
            }
            Ok(result)
        };
        config = config.with_via_type_of(roots("via_type_of")?);
        config = config.with_via_value_of(roots("via_value_of")?);
        if let Some(names) = entry.get("canonical_names").and_then(Value::as_array) {
            let mut set = CanonicalNameSet::bottom();
            for name in names {
                if let Some(template) = name.get("template").and_then(Value::as_str) {
                    set.add(CanonicalName::Template(context.str(template)));
                }
            }
            config = config.with_canonical_names(set);
        }
        Ok((port, config))
    };

    for key in ["generations", "sources"] {
        if let Some(entries) = value.get(key).and_then(Value::as_array) {
            for entry in entries {
                let (port, config) = taint_config(entry)?;
                model.add_generation(port, config, context)?;
            }
        }
    }
    if let Some(entries) = value.get("parameter_sources").and_then(Value::as_array) {
        for entry in entries {
            let (port, config) = taint_config(entry)?;
            model.add_parameter_source(port, config, context)?;
        }
    }
    if let Some(entries) = value.get("sinks").and_then(Value::as_array) {
        for entry in entries {
            let (port, config) = taint_config(entry)?;
            model.add_sink(port, config, context)?;
        }
    }
    if let Some(entries) = value.get("effect_sources").and_then(Value::as_array) {
        for entry in entries {
            let (_, config) = taint_config(entry)?;
            model.add_call_effect_source(config, context)?;
        }
    }
    if let Some(entries) = value.get("effect_sinks").and_then(Value::as_array) {
        for entry in entries {
            let (_, config) = taint_config(entry)?;
            model.add_call_effect_sink(config, context)?;
        }
    }
    if let Some(entries) = value.get("propagation").and_then(Value::as_array) {
        for entry in entries {
            let input = port_from_json(entry.get("input"), context, &method_name)?;
            let output = port_from_json(entry.get("output"), context, &method_name)?;
            let kind = if output.root().is_return() {
                context.kinds.local_return()
            } else {
                context
                    .kinds
                    .local_argument(output.root().parameter_position())
            };
            let mut output_paths = PathTree::bottom();
            output_paths.write(
                output.path(),
                CollapseDepth::zero(),
                UpdateKind::Weak,
            );
            let mut config =
                PropagationConfig::new(input, kind).with_output_paths(output_paths);
            if let Some(features) = entry.get("features") {
                config = config
                    .with_features(feature_set_from_json(features, context, &method_name)?);
            }
            model.add_propagation(config, context)?;
        }
    }
    if let Some(sanitizers) = value.get("sanitizers").and_then(Value::as_array) {
        for sanitizer in sanitizers {
            model.add_global_sanitizer(sanitizer_from_json(
                sanitizer,
                context,
                &method_name,
            )?);
        }
    }
    let mut attach = |key: &str,
                      add: &mut dyn FnMut(&mut Model, Root, FeatureSet)|
     -> JsonResult<()> {
        if let Some(entries) = value.get(key).and_then(Value::as_array) {
            for entry in entries {
                let port = port_from_json(entry.get("port"), context, &method_name)?;
                let features = feature_set_from_json(
                    entry
                        .get("features")
                        .ok_or_else(|| malformed(&method_name, "missing features"))?,
                    context,
                    &method_name,
                )?;
                add(&mut model, port.root(), features);
            }
        }
        Ok(())
    };
    attach("attach_to_sources", &mut |model, root, features| {
        model.add_attach_to_sources(root, features)
    })?;
    attach("attach_to_sinks", &mut |model, root, features| {
        model.add_attach_to_sinks(root, features)
    })?;
    attach("attach_to_propagations", &mut |model, root, features| {
        model.add_attach_to_propagations(root, features)
    })?;
    attach("add_features_to_arguments", &mut |model, root, features| {
        model.add_add_features_to_arguments(root, features)
    })?;

    Ok(model)
}
