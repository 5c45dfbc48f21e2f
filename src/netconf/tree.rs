//! Compilation of `xpath:type` field specs into the path tree the reply
//! parser walks.
//!
//! A spec like `/interface-information/physical-interface[ifname]/speed:string`
//! yields a tag leaf at `/interface-information/physical-interface/ifname`,
//! a field leaf at `/interface-information/physical-interface/speed`, and
//! registers the field under its loop parent
//! `/interface-information/physical-interface`, whose end tag drives
//! emission. `tag_length` counts the bracketed ancestors a field needs
//! bound before it is emittable.

use std::collections::HashMap;

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum SpecError {
    #[error("malformed field spec {0:?}, expected xpath:type")]
    MissingType(String),

    #[error("malformed field spec {0:?}, empty xpath")]
    EmptyPath(String),

    #[error("unbalanced bracket in field spec {0:?}")]
    UnbalancedBracket(String),
}

/// Field value coercion applied to character data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Int,
    Float,
    /// `YYYY-MM-DD HH:MM:SS TZ` converted to Unix nanoseconds.
    Epoch,
    Str,
}

impl FieldKind {
    fn from_spec(s: &str) -> Self {
        match s {
            "int" => FieldKind::Int,
            "float" => FieldKind::Float,
            "epoch" => FieldKind::Epoch,
            _ => FieldKind::Str,
        }
    }
}

/// A bracketed key: its end tag binds a tag value for the enclosing loop.
#[derive(Debug, Clone)]
pub struct TagLeaf {
    pub short_name: String,
    /// Path of the element the key lives on.
    pub elem_path: String,
}

/// A terminal element carrying a field value.
#[derive(Debug, Clone)]
pub struct FieldLeaf {
    pub short_name: String,
    pub kind: FieldKind,
    /// Number of ancestor keys that must be bound before emission.
    pub tag_length: usize,
}

/// The compiled tree for one subscription.
#[derive(Debug, Default)]
pub struct PathTree {
    /// Tag leaf xpath (`elem_path/key`) -> leaf.
    pub tags: HashMap<String, TagLeaf>,
    /// Field leaf xpath -> leaf.
    pub fields: HashMap<String, FieldLeaf>,
    /// Parent xpath -> field leaf xpaths emitted at its end tag.
    pub parents: HashMap<String, Vec<String>>,
}

impl PathTree {
    /// Compile a list of `xpath:type` specs into one tree.
    pub fn compile(specs: &[String]) -> Result<Self, SpecError> {
        let mut tree = PathTree::default();
        for spec in specs {
            tree.add_spec(spec)?;
        }
        Ok(tree)
    }

    fn add_spec(&mut self, spec: &str) -> Result<(), SpecError> {
        let (xpath, kind) = spec
            .rsplit_once(':')
            .ok_or_else(|| SpecError::MissingType(spec.to_string()))?;

        if xpath.trim_matches('/').is_empty() {
            return Err(SpecError::EmptyPath(spec.to_string()));
        }

        let mut path = String::new();
        let mut tag_length = 0;
        let mut loop_parent: Option<String> = None;
        let mut last_elem_start = 0;

        for elem in xpath.split('/').filter(|e| !e.is_empty()) {
            let (name, key) = match (elem.find('['), elem.find(']')) {
                (Some(open), Some(close)) if open < close => {
                    (&elem[..open], Some(&elem[open + 1..close]))
                }
                (None, None) => (elem, None),
                _ => return Err(SpecError::UnbalancedBracket(spec.to_string())),
            };

            last_elem_start = path.len();
            path.push('/');
            path.push_str(name);

            if let Some(key) = key {
                tag_length += 1;
                loop_parent = Some(path.clone());
                self.tags
                    .entry(format!("{path}/{key}"))
                    .or_insert_with(|| TagLeaf {
                        short_name: key.to_string(),
                        elem_path: path.clone(),
                    });
            }
        }

        let short_name = path[last_elem_start + 1..].to_string();

        // A field without any loop key emits when its direct parent closes.
        let parent = loop_parent.unwrap_or_else(|| path[..last_elem_start].to_string());

        self.fields.insert(
            path.clone(),
            FieldLeaf {
                short_name,
                kind: FieldKind::from_spec(kind),
                tag_length,
            },
        );

        let children = self.parents.entry(parent).or_default();
        if !children.contains(&path) {
            children.push(path);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_compile_looped_fields() {
        let tree = PathTree::compile(&specs(&[
            "/interface-information/physical-interface[ifname]/speed:string",
            "/interface-information/physical-interface[ifname]/traffic-statistics/input-packets:int",
        ]))
        .unwrap();

        let tag = tree
            .tags
            .get("/interface-information/physical-interface/ifname")
            .expect("tag leaf");
        assert_eq!(tag.short_name, "ifname");
        assert_eq!(tag.elem_path, "/interface-information/physical-interface");

        let speed = tree
            .fields
            .get("/interface-information/physical-interface/speed")
            .expect("field leaf");
        assert_eq!(speed.short_name, "speed");
        assert_eq!(speed.kind, FieldKind::Str);
        assert_eq!(speed.tag_length, 1);

        let packets = tree
            .fields
            .get("/interface-information/physical-interface/traffic-statistics/input-packets")
            .expect("field leaf");
        assert_eq!(packets.kind, FieldKind::Int);

        let children = tree
            .parents
            .get("/interface-information/physical-interface")
            .expect("loop parent");
        assert_eq!(children.len(), 2);
    }

    #[test]
    fn test_compile_field_without_loop_key() {
        let tree =
            PathTree::compile(&specs(&["/system-information/uptime:epoch"])).unwrap();

        let field = tree.fields.get("/system-information/uptime").unwrap();
        assert_eq!(field.tag_length, 0);
        assert_eq!(field.kind, FieldKind::Epoch);

        // Emits when the enclosing element closes.
        assert_eq!(
            tree.parents.get("/system-information").unwrap(),
            &vec!["/system-information/uptime".to_string()]
        );
    }

    #[test]
    fn test_nested_loop_keys_count_ancestors() {
        let tree = PathTree::compile(&specs(&[
            "/a[k1]/b[k2]/value:float",
        ]))
        .unwrap();

        let field = tree.fields.get("/a/b/value").unwrap();
        assert_eq!(field.tag_length, 2);

        // The deepest bracketed element owns emission.
        assert!(tree.parents.contains_key("/a/b"));
        assert!(tree.tags.contains_key("/a/k1"));
        assert!(tree.tags.contains_key("/a/b/k2"));
    }

    #[test]
    fn test_missing_type_is_error() {
        let err = PathTree::compile(&specs(&["/a/b/c"])).unwrap_err();
        assert!(matches!(err, SpecError::MissingType(_)));
    }

    #[test]
    fn test_unbalanced_bracket_is_error() {
        let err = PathTree::compile(&specs(&["/a/b[ifname/c:int"])).unwrap_err();
        assert!(matches!(err, SpecError::UnbalancedBracket(_)));
    }

    #[test]
    fn test_unknown_type_defaults_to_string() {
        let tree = PathTree::compile(&specs(&["/a/b:hex"])).unwrap();
        assert_eq!(tree.fields.get("/a/b").unwrap().kind, FieldKind::Str);
    }
}
