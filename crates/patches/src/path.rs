//! Minimal field path language over JSON objects.
//!
//! Grammar: `[$][.]seg(.seg | [idx] | [*] | ['key'])*` where `seg` is a bare
//! key. Quoted keys allow dots and slashes (`metadata.annotations['a.io/b']`).

use std::fmt;

use serde_json::Value as Json;
use smallvec::SmallVec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
    Wildcard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    raw: String,
    segments: SmallVec<[Segment; 6]>,
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.raw) }
}

impl JsonPath {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut s = raw.strip_prefix('$').unwrap_or(raw);
        s = s.strip_prefix('.').unwrap_or(s);
        if s.is_empty() {
            return Err("empty path".into());
        }
        let bytes = s.as_bytes();
        let mut segments = SmallVec::new();
        let mut i = 0;
        let mut expect_key = true;
        while i < bytes.len() {
            match bytes[i] {
                b'.' => {
                    if expect_key { return Err(format!("empty segment at offset {}", i)); }
                    expect_key = true;
                    i += 1;
                }
                b'[' => {
                    let close = s[i..].find(']').map(|o| i + o).ok_or_else(|| format!("unclosed '[' at offset {}", i))?;
                    let inner = &s[i + 1..close];
                    let seg = if inner == "*" {
                        Segment::Wildcard
                    } else if let Some(q) = inner.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')) {
                        Segment::Key(q.to_string())
                    } else if let Some(q) = inner.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
                        Segment::Key(q.to_string())
                    } else if !inner.is_empty() && inner.chars().all(|c| c.is_ascii_digit()) {
                        Segment::Index(inner.parse().map_err(|e| format!("index {:?}: {}", inner, e))?)
                    } else {
                        return Err(format!("invalid bracket segment {:?}", inner));
                    };
                    segments.push(seg);
                    expect_key = false;
                    i = close + 1;
                }
                _ => {
                    if !expect_key { return Err(format!("missing '.' before offset {}", i)); }
                    let end = s[i..].find(['.', '[']).map(|o| i + o).unwrap_or(s.len());
                    let key = &s[i..end];
                    if key == "*" { segments.push(Segment::Wildcard); } else { segments.push(Segment::Key(key.to_string())); }
                    expect_key = false;
                    i = end;
                }
            }
        }
        if expect_key {
            return Err("path ends with '.'".into());
        }
        Ok(Self { raw: raw.to_string(), segments })
    }

    pub fn as_str(&self) -> &str { &self.raw }
    pub fn segments(&self) -> &[Segment] { &self.segments }

    /// First node matched by the path.
    pub fn first<'a>(&self, root: &'a Json) -> Option<&'a Json> {
        let mut out = Vec::new();
        collect(root, &self.segments, &mut out);
        out.into_iter().next()
    }

    /// Every node matched by the path, in document order.
    pub fn matches<'a>(&self, root: &'a Json) -> Vec<&'a Json> {
        let mut out = Vec::new();
        collect(root, &self.segments, &mut out);
        out
    }

    /// Run `f` on every existing node matched by the path. Returns how many matched.
    pub fn for_each_mut<E>(&self, root: &mut Json, mut f: impl FnMut(&mut Json) -> Result<(), E>) -> Result<usize, E> {
        let mut count = 0;
        visit_mut(root, &self.segments, &mut f, &mut count)?;
        Ok(count)
    }

    /// Set `value` at the path, creating missing intermediate objects. With
    /// `append`, an existing array at the target receives `value` as a new element.
    pub fn set(&self, root: &mut Json, value: &Json, append: bool) -> Result<usize, String> { set_rec(root, &self.segments, value, append) }

    /// Remove every matched node for which `keep` returns false. Returns how many were removed.
    pub fn remove_where(&self, root: &mut Json, keep: &dyn Fn(&Json) -> bool) -> usize { remove_rec(root, &self.segments, keep) }

    pub fn remove(&self, root: &mut Json) -> usize { self.remove_where(root, &|_| false) }
}

fn collect<'a>(node: &'a Json, segs: &[Segment], out: &mut Vec<&'a Json>) {
    let Some((head, rest)) = segs.split_first() else {
        out.push(node);
        return;
    };
    match head {
        Segment::Key(k) => {
            if let Some(child) = node.get(k.as_str()) { collect(child, rest, out); }
        }
        Segment::Index(i) => {
            if let Some(child) = node.as_array().and_then(|a| a.get(*i)) { collect(child, rest, out); }
        }
        Segment::Wildcard => match node {
            Json::Array(items) => items.iter().for_each(|c| collect(c, rest, out)),
            Json::Object(map) => map.values().for_each(|c| collect(c, rest, out)),
            _ => {}
        },
    }
}

fn visit_mut<E>(node: &mut Json, segs: &[Segment], f: &mut dyn FnMut(&mut Json) -> Result<(), E>, count: &mut usize) -> Result<(), E> {
    let Some((head, rest)) = segs.split_first() else {
        *count += 1;
        return f(node);
    };
    match head {
        Segment::Key(k) => {
            if let Some(child) = node.as_object_mut().and_then(|m| m.get_mut(k)) { visit_mut(child, rest, f, count)?; }
        }
        Segment::Index(i) => {
            if let Some(child) = node.as_array_mut().and_then(|a| a.get_mut(*i)) { visit_mut(child, rest, f, count)?; }
        }
        Segment::Wildcard => match node {
            Json::Array(items) => {
                for c in items.iter_mut() { visit_mut(c, rest, f, count)?; }
            }
            Json::Object(map) => {
                for c in map.values_mut() { visit_mut(c, rest, f, count)?; }
            }
            _ => {}
        },
    }
    Ok(())
}

fn set_rec(node: &mut Json, segs: &[Segment], value: &Json, append: bool) -> Result<usize, String> {
    let Some((head, rest)) = segs.split_first() else {
        match node {
            Json::Array(items) if append => items.push(value.clone()),
            _ => *node = value.clone(),
        }
        return Ok(1);
    };
    match head {
        Segment::Key(k) => {
            if node.is_null() { *node = Json::Object(serde_json::Map::new()); }
            let map = node.as_object_mut().ok_or_else(|| format!("cannot set key {:?} on a non-object", k))?;
            let child = map.entry(k.clone()).or_insert(Json::Null);
            set_rec(child, rest, value, append)
        }
        Segment::Index(i) => {
            if node.is_null() { *node = Json::Array(Vec::new()); }
            let items = node.as_array_mut().ok_or_else(|| format!("cannot index [{}] into a non-array", i))?;
            if *i == items.len() {
                items.push(Json::Null);
            }
            let child = items.get_mut(*i).ok_or_else(|| format!("index [{}] out of bounds", i))?;
            set_rec(child, rest, value, append)
        }
        Segment::Wildcard => {
            let mut total = 0;
            match node {
                Json::Array(items) => {
                    for c in items.iter_mut() { total += set_rec(c, rest, value, append)?; }
                }
                Json::Object(map) => {
                    for c in map.values_mut() { total += set_rec(c, rest, value, append)?; }
                }
                _ => {}
            }
            Ok(total)
        }
    }
}

fn remove_rec(node: &mut Json, segs: &[Segment], keep: &dyn Fn(&Json) -> bool) -> usize {
    let Some((head, rest)) = segs.split_first() else { return 0 };
    if rest.is_empty() {
        return match (head, node) {
            (Segment::Key(k), Json::Object(map)) => match map.get(k) {
                Some(v) if !keep(v) => { map.remove(k); 1 }
                _ => 0,
            },
            (Segment::Index(i), Json::Array(items)) => match items.get(*i) {
                Some(v) if !keep(v) => { items.remove(*i); 1 }
                _ => 0,
            },
            (Segment::Wildcard, Json::Array(items)) => {
                let before = items.len();
                items.retain(|v| keep(v));
                before - items.len()
            }
            (Segment::Wildcard, Json::Object(map)) => {
                let before = map.len();
                map.retain(|_, v| keep(v));
                before - map.len()
            }
            _ => 0,
        };
    }
    match head {
        Segment::Key(k) => node.as_object_mut().and_then(|m| m.get_mut(k)).map_or(0, |c| remove_rec(c, rest, keep)),
        Segment::Index(i) => node.as_array_mut().and_then(|a| a.get_mut(*i)).map_or(0, |c| remove_rec(c, rest, keep)),
        Segment::Wildcard => match node {
            Json::Array(items) => items.iter_mut().map(|c| remove_rec(c, rest, keep)).sum(),
            Json::Object(map) => map.values_mut().map(|c| remove_rec(c, rest, keep)).sum(),
            _ => 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_keys_indices_wildcards_and_quotes() {
        let p = JsonPath::parse("$.spec.containers[*].args[0]").unwrap();
        assert_eq!(
            p.segments(),
            &[
                Segment::Key("spec".into()),
                Segment::Key("containers".into()),
                Segment::Wildcard,
                Segment::Key("args".into()),
                Segment::Index(0),
            ]
        );
        let q = JsonPath::parse("metadata.annotations['example.com/ref']").unwrap();
        assert_eq!(q.segments()[2], Segment::Key("example.com/ref".into()));
        let r = JsonPath::parse(".data[\"a.b\"]").unwrap();
        assert_eq!(r.segments()[1], Segment::Key("a.b".into()));
    }

    #[test]
    fn rejects_malformed_paths() {
        for bad in ["", "$", "a..b", "a.", "a[", "a[x]", "a[1]b", "a[-1]"] {
            assert!(JsonPath::parse(bad).is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn set_creates_intermediate_objects() {
        let mut v = json!({"spec": {}});
        let p = JsonPath::parse("spec.template.name").unwrap();
        assert_eq!(p.set(&mut v, &json!("x"), false).unwrap(), 1);
        assert_eq!(v, json!({"spec": {"template": {"name": "x"}}}));
        let err = JsonPath::parse("spec.template.name.deeper").unwrap().set(&mut v, &json!(1), false);
        assert!(err.is_err());
    }

    #[test]
    fn set_appends_to_arrays_when_asked() {
        let mut v = json!({"args": ["a"]});
        let p = JsonPath::parse("args").unwrap();
        p.set(&mut v, &json!("b"), true).unwrap();
        assert_eq!(v, json!({"args": ["a", "b"]}));
    }

    #[test]
    fn wildcard_visits_and_removes() {
        let mut v = json!({"items": [{"n": "a", "x": 1}, {"n": "b", "x": 2}, {"n": "c"}]});
        let p = JsonPath::parse("items[*].n").unwrap();
        let names: Vec<_> = p.matches(&v).into_iter().filter_map(|n| n.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);

        let visited = p.for_each_mut(&mut v, |n| -> Result<(), ()> { *n = json!("z"); Ok(()) }).unwrap();
        assert_eq!(visited, 3);

        let removed = JsonPath::parse("items[*].x").unwrap().remove_where(&mut v, &|x| x == &json!(2));
        assert_eq!(removed, 1);
        assert_eq!(v, json!({"items": [{"n": "z"}, {"n": "z", "x": 2}, {"n": "z"}]}));
    }
}
