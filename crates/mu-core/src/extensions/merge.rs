//! Overlay merge for YAML documents.
//!
//! Keys of the overlay are applied to the target one at a time:
//!
//! - `{Fn::Splice: [start, count, items]}` splices `items` into a sequence at
//!   `start`, merging the first `count` of them with the elements they land on.
//! - `{Fn::Replace: value}` replaces the target value outright.
//! - Sequences are appended, mappings merged recursively, anything else replaced.
use serde_yaml::{Mapping, Value};

const SPLICE: &str = "Fn::Splice";
const REPLACE: &str = "Fn::Replace";

/// Merge `overlay` into `target`. Both must be mappings; otherwise `target` is left as is.
pub fn apply(target: &mut Value, overlay: Value) {
    if let (Value::Mapping(dest), Value::Mapping(src)) = (target, overlay) {
        apply_mapping(dest, src);
    }
}

fn apply_mapping(dest: &mut Mapping, src: Mapping) {
    for (key, value) in src {
        match dest.get_mut(&key) {
            Some(existing) => {
                let current = std::mem::take(existing);
                *existing = merge_value(Some(current), value);
            }
            None => {
                dest.insert(key, merge_value(None, value));
            }
        }
    }
}

fn operator<'a>(value: &'a Value, name: &str) -> Option<&'a Value> {
    value.as_mapping()?.get(name)
}

fn merge_value(dest: Option<Value>, src: Value) -> Value {
    if let Some(Value::Sequence(args)) = operator(&src, SPLICE) {
        if let [start, count, items] = args.as_slice() {
            return splice(dest, start, count, items.clone());
        }
    }
    if let Some(replacement) = operator(&src, REPLACE) {
        return replacement.clone();
    }
    append(dest, src)
}

fn append(dest: Option<Value>, src: Value) -> Value {
    match (dest, src) {
        (Some(Value::Sequence(mut existing)), Value::Sequence(items)) => {
            existing.extend(items);
            Value::Sequence(existing)
        }
        (Some(Value::Mapping(mut existing)), Value::Mapping(entries)) => {
            apply_mapping(&mut existing, entries);
            Value::Mapping(existing)
        }
        (_, src) => src,
    }
}

fn as_index(value: &Value) -> usize {
    value.as_u64().and_then(|n| usize::try_from(n).ok()).unwrap_or(0)
}

fn splice(dest: Option<Value>, start: &Value, count: &Value, items: Value) -> Value {
    let Some(Value::Sequence(existing)) = dest else {
        return items;
    };
    let Value::Sequence(items) = items else {
        return Value::Sequence(existing);
    };

    let start = as_index(start).min(existing.len());
    let count = as_index(count);

    let mut spliced = existing[..start].to_vec();
    for (i, item) in items.into_iter().enumerate() {
        match existing.get(start + i) {
            Some(current) if i < count => spliced.push(append(Some(current.clone()), item)),
            _ => spliced.push(item),
        }
    }
    if let Some(rest) = existing.get(start + count..) {
        spliced.extend_from_slice(rest);
    }
    Value::Sequence(spliced)
}
