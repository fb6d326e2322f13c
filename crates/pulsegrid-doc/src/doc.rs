//! StatusDoc — dotted-path JSON documents with aggregate operators.

use serde_json::{Map, Value};

use crate::error::{DocError, DocResult};

/// Numeric addition across contributions.
pub const OP_SUM: &str = "$sum";
/// Numeric maximum across contributions.
pub const OP_MAX: &str = "$max";
/// The contribution with the greatest sibling `timestamp` wins.
pub const OP_LATEST: &str = "$latest";
/// Subtree pruned when the sibling `version` falls behind the reference.
pub const OP_EXPIRES: &str = "$expires";

/// Argument sibling of `$expires`.
const ARG_VERSION: &str = "version";
/// Argument sibling of `$latest`.
const ARG_TIMESTAMP: &str = "timestamp";

/// A JSON object with dotted-path accessors and aggregate-operator
/// merge/evaluation semantics. The root is always an object.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusDoc(Value);

impl StatusDoc {
    /// An empty document.
    pub fn new() -> Self {
        Self(Value::Object(Map::new()))
    }

    /// Parse a stored entry. Fails on malformed JSON or a non-object root.
    pub fn parse(bytes: &[u8]) -> DocResult<Self> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| DocError::Parse(e.to_string()))?;
        Self::from_value(value)
    }

    /// Wrap an already-parsed value. Fails on a non-object root.
    pub fn from_value(value: Value) -> DocResult<Self> {
        if value.is_object() {
            Ok(Self(value))
        } else {
            Err(DocError::NotAnObject)
        }
    }

    /// Serialize for storage.
    pub fn to_bytes(&self) -> DocResult<Vec<u8>> {
        serde_json::to_vec(&self.0).map_err(|e| DocError::Serialize(e.to_string()))
    }

    /// Borrow the underlying value.
    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Take the underlying value.
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Set `value` at a dotted path, creating intermediate objects.
    /// A path segment may be an operator key (`a.b.$sum`); operators are
    /// plain keys until evaluation. Non-object intermediates are
    /// replaced.
    pub fn create(&mut self, path: &str, value: Value) {
        let mut cur = &mut self.0;
        let mut rest = path;
        while let Some((seg, tail)) = rest.split_once('.') {
            if !matches!(cur, Value::Object(_)) {
                *cur = Value::Object(Map::new());
            }
            cur = match cur {
                Value::Object(map) => map
                    .entry(seg.to_string())
                    .or_insert_with(|| Value::Object(Map::new())),
                _ => return,
            };
            rest = tail;
        }
        if !matches!(cur, Value::Object(_)) {
            *cur = Value::Object(Map::new());
        }
        if let Value::Object(map) = cur {
            map.insert(rest.to_string(), value);
        }
    }

    /// Value at a dotted path, if present.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut cur = &self.0;
        for seg in path.split('.') {
            cur = cur.as_object()?.get(seg)?;
        }
        Some(cur)
    }

    /// Whether a dotted path resolves to a non-null value.
    pub fn has(&self, path: &str) -> bool {
        self.get(path).is_some_and(|v| !v.is_null())
    }

    pub fn try_get_i64(&self, path: &str) -> Option<i64> {
        self.get(path)?.as_i64()
    }

    pub fn try_get_u64(&self, path: &str) -> Option<u64> {
        self.get(path)?.as_u64()
    }

    pub fn try_get_f64(&self, path: &str) -> Option<f64> {
        self.get(path)?.as_f64()
    }

    pub fn try_get_str(&self, path: &str) -> Option<&str> {
        self.get(path)?.as_str()
    }

    /// Operator-aware deep merge of another contribution into this one.
    ///
    /// Plain objects merge recursively and scalar conflicts resolve
    /// last-absorbed-wins. Operator keys combine: `$sum` adds, `$max`
    /// maxes, a `$latest` group is taken whole from the side with the
    /// greater sibling `timestamp`, and `$expires` contents merge
    /// recursively with the sibling `version` keeping the maximum, so a
    /// merged layer stays alive while any contributor is unexpired.
    pub fn absorb(&mut self, other: &StatusDoc) -> DocResult<()> {
        merge_values(&mut self.0, &other.0)
    }

    /// Evaluate every operator against `reference_version`, bottom-up.
    ///
    /// `$sum`/`$max`/`$latest` objects unwrap to their resolved value;
    /// argument siblings (`version`, `timestamp`) are consumed. An
    /// `$expires` whose sibling `version` is below the reference prunes
    /// the containing subtree to `null`. One reference version governs
    /// the entire evaluation.
    pub fn clean_ops(&mut self, reference_version: u64) -> DocResult<()> {
        clean_value(&mut self.0, reference_version)
    }
}

impl Default for StatusDoc {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_values(dst: &mut Value, src: &Value) -> DocResult<()> {
    match (dst, src) {
        (Value::Object(d), Value::Object(s)) => merge_objects(d, s),
        (dst, src) => {
            *dst = src.clone();
            Ok(())
        }
    }
}

fn merge_objects(dst: &mut Map<String, Value>, src: &Map<String, Value>) -> DocResult<()> {
    // A $latest group resolves as a whole: operator value and argument
    // siblings all come from the side with the greater timestamp.
    if dst.contains_key(OP_LATEST) && src.contains_key(OP_LATEST) {
        let dst_ts = dst.get(ARG_TIMESTAMP).and_then(Value::as_f64).unwrap_or(0.0);
        let src_ts = src.get(ARG_TIMESTAMP).and_then(Value::as_f64).unwrap_or(0.0);
        if src_ts > dst_ts {
            *dst = src.clone();
        }
        return Ok(());
    }

    let has_expires = dst.contains_key(OP_EXPIRES) || src.contains_key(OP_EXPIRES);
    for (key, sv) in src {
        match dst.entry(key.clone()) {
            serde_json::map::Entry::Vacant(slot) => {
                slot.insert(sv.clone());
            }
            serde_json::map::Entry::Occupied(mut slot) => match key.as_str() {
                OP_SUM => {
                    let merged = add_numbers(slot.get(), sv)?;
                    slot.insert(merged);
                }
                OP_MAX => {
                    let merged = max_numbers(slot.get(), sv)?;
                    slot.insert(merged);
                }
                ARG_VERSION if has_expires => {
                    let merged = max_numbers(slot.get(), sv)?;
                    slot.insert(merged);
                }
                _ => merge_values(slot.get_mut(), sv)?,
            },
        }
    }
    Ok(())
}

fn add_numbers(a: &Value, b: &Value) -> DocResult<Value> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64())
        && let Some(sum) = x.checked_add(y)
    {
        return Ok(Value::from(sum));
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => serde_json::Number::from_f64(x + y)
            .map(Value::Number)
            .ok_or_else(|| DocError::BadOperator("non-finite $sum result".to_string())),
        _ => Err(DocError::BadOperator(format!(
            "$sum over non-numeric values {a} and {b}"
        ))),
    }
}

fn max_numbers(a: &Value, b: &Value) -> DocResult<Value> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return Ok(Value::from(x.max(y)));
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => serde_json::Number::from_f64(x.max(y))
            .map(Value::Number)
            .ok_or_else(|| DocError::BadOperator("non-finite $max result".to_string())),
        _ => Err(DocError::BadOperator(format!(
            "$max over non-numeric values {a} and {b}"
        ))),
    }
}

fn clean_value(value: &mut Value, reference: u64) -> DocResult<()> {
    match value {
        Value::Array(items) => {
            for item in items {
                clean_value(item, reference)?;
            }
            return Ok(());
        }
        Value::Object(_) => {}
        _ => return Ok(()),
    }

    // Take ownership of the object; a failed evaluation leaves the
    // document in an unspecified, partially evaluated state.
    let Value::Object(mut map) = std::mem::take(value) else {
        return Ok(());
    };
    for (_, child) in map.iter_mut() {
        clean_value(child, reference)?;
    }

    if map.keys().filter(|k| k.starts_with('$')).count() > 1 {
        return Err(DocError::BadOperator(
            "multiple operators in one object".to_string(),
        ));
    }
    let Some(op) = map.keys().find(|k| k.starts_with('$')).cloned() else {
        *value = Value::Object(map);
        return Ok(());
    };

    *value = match op.as_str() {
        OP_SUM | OP_MAX => {
            let inner = map.remove(&op).unwrap_or(Value::Null);
            if !inner.is_number() {
                return Err(DocError::BadOperator(format!("{op} holds a non-number")));
            }
            inner
        }
        OP_LATEST => map.remove(&op).unwrap_or(Value::Null),
        OP_EXPIRES => {
            let version = map.get(ARG_VERSION).and_then(Value::as_u64).ok_or_else(|| {
                DocError::BadOperator("$expires without a numeric version".to_string())
            })?;
            let inner = map.remove(&op).unwrap_or(Value::Null);
            if version >= reference { inner } else { Value::Null }
        }
        other => {
            return Err(DocError::BadOperator(format!("unknown operator {other}")));
        }
    };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_builds_nested_paths() {
        let mut doc = StatusDoc::new();
        doc.create("layer.instances_running.$sum", json!(1));
        doc.create("layer.instances.abc.id", json!("abc"));

        assert_eq!(
            doc.value(),
            &json!({"layer": {"instances_running": {"$sum": 1},
                              "instances": {"abc": {"id": "abc"}}}})
        );
    }

    #[test]
    fn create_replaces_non_object_intermediates() {
        let mut doc = StatusDoc::new();
        doc.create("a.b", json!(1));
        doc.create("a.b.c", json!(2));
        assert_eq!(doc.value(), &json!({"a": {"b": {"c": 2}}}));
    }

    #[test]
    fn get_and_has_walk_dotted_paths() {
        let mut doc = StatusDoc::new();
        doc.create("a.b.c", json!(7));

        assert_eq!(doc.try_get_i64("a.b.c"), Some(7));
        assert!(doc.has("a.b"));
        assert!(!doc.has("a.b.missing"));
        assert!(!doc.has("z"));
    }

    #[test]
    fn has_treats_null_as_absent() {
        let mut doc = StatusDoc::new();
        doc.create("a.b", Value::Null);
        assert!(!doc.has("a.b"));
        assert!(!doc.has("a.b.c"));
    }

    #[test]
    fn parse_rejects_garbage_and_non_objects() {
        assert!(matches!(
            StatusDoc::parse(b"not json"),
            Err(DocError::Parse(_))
        ));
        assert!(matches!(
            StatusDoc::parse(b"[1, 2]"),
            Err(DocError::NotAnObject)
        ));
    }

    #[test]
    fn absorb_adds_sums() {
        let mut a = StatusDoc::new();
        a.create("layer.instances_running.$sum", json!(1));
        let mut b = StatusDoc::new();
        b.create("layer.instances_running.$sum", json!(1));
        b.create("layer.total_workers.$sum", json!(10));

        a.absorb(&b).unwrap();
        assert_eq!(
            a.value(),
            &json!({"layer": {"instances_running": {"$sum": 2},
                              "total_workers": {"$sum": 10}}})
        );
    }

    #[test]
    fn absorb_sum_is_commutative() {
        let mut left = StatusDoc::new();
        left.create("w.$sum", json!(5));
        let mut right = StatusDoc::new();
        right.create("w.$sum", json!(5));

        let mut ab = left.clone();
        ab.absorb(&right).unwrap();
        let mut ba = right.clone();
        ba.absorb(&left).unwrap();

        assert_eq!(ab, ba);
        assert_eq!(ab.value(), &json!({"w": {"$sum": 10}}));
    }

    #[test]
    fn absorb_takes_max() {
        let mut a = StatusDoc::new();
        a.create("last_updated.$max", json!(100.5));
        let mut b = StatusDoc::new();
        b.create("last_updated.$max", json!(99.0));

        a.absorb(&b).unwrap();
        assert_eq!(a.value(), &json!({"last_updated": {"$max": 100.5}}));
    }

    #[test]
    fn absorb_latest_group_comes_from_newer_side() {
        let mut a = StatusDoc::new();
        a.create("tags.$latest.t1.state", json!("old"));
        a.create("tags.timestamp", json!(100.0));
        let mut b = StatusDoc::new();
        b.create("tags.$latest.t1.state", json!("new"));
        b.create("tags.timestamp", json!(200.0));

        let mut merged = a.clone();
        merged.absorb(&b).unwrap();
        assert_eq!(merged.try_get_str("tags.$latest.t1.state"), Some("new"));
        assert_eq!(merged.try_get_f64("tags.timestamp"), Some(200.0));

        // Absorbing the older side changes nothing.
        let mut merged = b.clone();
        merged.absorb(&a).unwrap();
        assert_eq!(merged.try_get_str("tags.$latest.t1.state"), Some("new"));
    }

    #[test]
    fn absorb_expires_merges_contents_and_keeps_max_version() {
        let mut a = StatusDoc::new();
        a.create("layer.$expires.instances_running.$sum", json!(1));
        a.create("layer.version", json!(1_000));
        let mut b = StatusDoc::new();
        b.create("layer.$expires.instances_running.$sum", json!(1));
        b.create("layer.version", json!(2_000));

        a.absorb(&b).unwrap();
        assert_eq!(
            a.try_get_i64("layer.$expires.instances_running.$sum"),
            Some(2)
        );
        assert_eq!(a.try_get_u64("layer.version"), Some(2_000));
    }

    #[test]
    fn absorb_scalar_conflict_last_wins() {
        let mut a = StatusDoc::new();
        a.create("k", json!("first"));
        let mut b = StatusDoc::new();
        b.create("k", json!("second"));

        a.absorb(&b).unwrap();
        assert_eq!(a.try_get_str("k"), Some("second"));
    }

    #[test]
    fn absorb_rejects_non_numeric_sum() {
        let mut a = StatusDoc::new();
        a.create("n.$sum", json!(1));
        let mut b = StatusDoc::new();
        b.create("n.$sum", json!("one"));

        assert!(matches!(a.absorb(&b), Err(DocError::BadOperator(_))));
    }

    #[test]
    fn clean_ops_unwraps_sum_max_latest() {
        let mut doc = StatusDoc::new();
        doc.create("instances_running.$sum", json!(3));
        doc.create("last_updated.$max", json!(42.0));
        doc.create("tags.$latest.t1.state", json!("running"));
        doc.create("tags.timestamp", json!(42.0));

        doc.clean_ops(0).unwrap();
        assert_eq!(
            doc.value(),
            &json!({"instances_running": 3,
                    "last_updated": 42.0,
                    "tags": {"t1": {"state": "running"}}})
        );
    }

    #[test]
    fn clean_ops_expires_alive_before_and_pruned_after() {
        let mut doc = StatusDoc::new();
        doc.create("layer.$expires.last_updated.$max", json!(42.0));
        doc.create("layer.version", json!(1_000));

        let mut alive = doc.clone();
        alive.clean_ops(1_000).unwrap();
        assert!(alive.has("layer.last_updated"));

        let mut expired = doc.clone();
        expired.clean_ops(1_001).unwrap();
        assert!(!expired.has("layer.last_updated"));
        assert_eq!(expired.get("layer"), Some(&Value::Null));
    }

    #[test]
    fn clean_ops_rejects_bad_operators() {
        let mut doc = StatusDoc::new();
        doc.create("n.$sum", json!("not a number"));
        assert!(matches!(doc.clean_ops(0), Err(DocError::BadOperator(_))));

        let mut doc = StatusDoc::new();
        doc.create("layer.$expires.x", json!(1));
        // No version argument.
        assert!(matches!(doc.clean_ops(0), Err(DocError::BadOperator(_))));

        let mut doc = StatusDoc::new();
        doc.create("x.$frob", json!(1));
        assert!(matches!(doc.clean_ops(0), Err(DocError::BadOperator(_))));
    }

    #[test]
    fn clean_ops_is_a_pure_fold_over_absorbed_contributions() {
        // Two instances publish; the merged, evaluated view aggregates.
        let mut a = StatusDoc::new();
        a.create("layer.$expires.instances_running.$sum", json!(1));
        a.create("layer.$expires.total_workers.$sum", json!(5));
        a.create("layer.$expires.last_updated.$max", json!(10.0));
        a.create("layer.version", json!(5_000));

        let mut b = StatusDoc::new();
        b.create("layer.$expires.instances_running.$sum", json!(1));
        b.create("layer.$expires.total_workers.$sum", json!(5));
        b.create("layer.$expires.last_updated.$max", json!(20.0));
        b.create("layer.version", json!(6_000));

        let mut merged = StatusDoc::new();
        merged.absorb(&a).unwrap();
        merged.absorb(&b).unwrap();
        merged.clean_ops(5_500).unwrap();

        assert_eq!(merged.try_get_i64("layer.instances_running"), Some(2));
        assert_eq!(merged.try_get_i64("layer.total_workers"), Some(10));
        assert_eq!(merged.try_get_f64("layer.last_updated"), Some(20.0));
    }

    #[test]
    fn bytes_roundtrip() {
        let mut doc = StatusDoc::new();
        doc.create("a.b.$sum", json!(1));
        let bytes = doc.to_bytes().unwrap();
        assert_eq!(StatusDoc::parse(&bytes).unwrap(), doc);
    }
}
