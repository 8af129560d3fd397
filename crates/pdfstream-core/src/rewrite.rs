//! Indirect-reference rewriting.
//!
//! When objects move into a new numbering space, every reference they
//! carry has to follow. The rewriter never mutates its input: it builds a
//! relabeled deep copy, so a source document stays read-only and can be
//! released as soon as its objects are emitted.

use std::collections::BTreeMap;

use lopdf::{Object, ObjectId};

/// Mapping from source-document references to their destination slots.
pub type ReferenceMap = BTreeMap<ObjectId, ObjectId>;

/// Deep-copy `object`, substituting every reference found in `mapping`.
///
/// References absent from the mapping are preserved verbatim. Recursion
/// covers arrays, dictionary values and stream dictionaries; dictionary
/// keys are names and never rewritten, and stream payloads are copied
/// unchanged.
pub fn replace_references(object: &Object, mapping: &ReferenceMap) -> Object {
    match object {
        Object::Reference(id) => Object::Reference(mapping.get(id).copied().unwrap_or(*id)),
        Object::Array(items) => Object::Array(
            items
                .iter()
                .map(|item| replace_references(item, mapping))
                .collect(),
        ),
        Object::Dictionary(dict) => {
            let mut rewritten = dict.clone();
            for (_, value) in rewritten.iter_mut() {
                let replaced = replace_references(value, mapping);
                *value = replaced;
            }
            Object::Dictionary(rewritten)
        }
        Object::Stream(stream) => {
            let mut rewritten = stream.clone();
            for (_, value) in rewritten.dict.iter_mut() {
                let replaced = replace_references(value, mapping);
                *value = replaced;
            }
            Object::Stream(rewritten)
        }
        other => other.clone(),
    }
}
