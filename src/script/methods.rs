//! Methods of built-in containers and strings
//!
//! Methods that take a callable (`list.sort(key=...)`) are handled by the
//! interpreter before reaching these.

use super::error::{ScriptError, ScriptResult};
use super::format::format_method;
use super::value::{Args, Dict, DictRef, ListRef, Value};

fn no_method(type_name: &str, name: &str) -> ScriptError {
    ScriptError::attribute(format!("'{}' object has no attribute '{}'", type_name, name))
}

fn str_arg<'a>(args: &'a Args, index: usize, name: &str, func: &str) -> ScriptResult<&'a str> {
    let value = args.require(index, name, func)?;
    value.as_str().ok_or_else(|| {
        ScriptError::type_error(format!(
            "{}() argument must be str, not {}",
            func,
            value.type_name()
        ))
    })
}

fn optional_chars(args: &Args) -> Option<Vec<char>> {
    args.get(0, "chars")
        .and_then(|v| v.as_str())
        .map(|s| s.chars().collect())
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut boundary = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if boundary {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            boundary = false;
        } else {
            out.push(c);
            boundary = true;
        }
    }
    out
}

fn pad(s: &str, width: i64, fill: char, align: char) -> String {
    let len = s.chars().count() as i64;
    if width <= len {
        return s.to_string();
    }
    let total = (width - len) as usize;
    let filler = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
    match align {
        '<' => format!("{}{}", s, filler(total)),
        '>' => format!("{}{}", filler(total), s),
        _ => {
            let left = total / 2;
            format!("{}{}{}", filler(left), s, filler(total - left))
        }
    }
}

fn fill_char(args: &Args) -> ScriptResult<char> {
    match args.get(1, "fillchar") {
        None => Ok(' '),
        Some(Value::Str(s)) if s.chars().count() == 1 => Ok(s.chars().next().unwrap_or(' ')),
        Some(_) => Err(ScriptError::type_error(
            "The fill character must be exactly one character long",
        )),
    }
}

pub fn str_method(s: &str, name: &str, args: &Args) -> ScriptResult<Value> {
    let out = match name {
        "upper" => Value::str(s.to_uppercase()),
        "lower" => Value::str(s.to_lowercase()),
        "title" => Value::str(title_case(s)),
        "capitalize" => {
            let mut chars = s.chars();
            Value::str(match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str().to_lowercase().as_str(),
                None => String::new(),
            })
        }
        "strip" => Value::str(match optional_chars(args) {
            Some(chars) => s.trim_matches(chars.as_slice()).to_string(),
            None => s.trim().to_string(),
        }),
        "lstrip" => Value::str(match optional_chars(args) {
            Some(chars) => s.trim_start_matches(chars.as_slice()).to_string(),
            None => s.trim_start().to_string(),
        }),
        "rstrip" => Value::str(match optional_chars(args) {
            Some(chars) => s.trim_end_matches(chars.as_slice()).to_string(),
            None => s.trim_end().to_string(),
        }),
        "replace" => {
            let old = str_arg(args, 0, "old", name)?;
            let new = str_arg(args, 1, "new", name)?;
            Value::str(s.replace(old, new))
        }
        "split" => {
            let limit = args.int_or(1, "maxsplit", -1)?;
            let parts: Vec<Value> = match args.get(0, "sep").and_then(|v| v.as_str()) {
                Some(sep) if sep.is_empty() => return Err(ScriptError::value("empty separator")),
                Some(sep) if limit >= 0 => s.splitn(limit as usize + 1, sep).map(Value::str).collect(),
                Some(sep) => s.split(sep).map(Value::str).collect(),
                None => s.split_whitespace().map(Value::str).collect(),
            };
            Value::list(parts)
        }
        "splitlines" => Value::list(s.lines().map(Value::str).collect()),
        "join" => {
            let items = args.require(0, "iterable", name)?.iter_values()?;
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Str(p) => parts.push(p),
                    other => {
                        return Err(ScriptError::type_error(format!(
                            "sequence item: expected str instance, {} found",
                            other.type_name()
                        )))
                    }
                }
            }
            Value::str(parts.join(s))
        }
        "startswith" => Value::Bool(s.starts_with(str_arg(args, 0, "prefix", name)?)),
        "endswith" => Value::Bool(s.ends_with(str_arg(args, 0, "suffix", name)?)),
        "find" => {
            let needle = str_arg(args, 0, "sub", name)?;
            Value::Int(s.find(needle).map(|i| s[..i].chars().count() as i64).unwrap_or(-1))
        }
        "count" => {
            let needle = str_arg(args, 0, "sub", name)?;
            Value::Int(if needle.is_empty() {
                s.chars().count() as i64 + 1
            } else {
                s.matches(needle).count() as i64
            })
        }
        "format" => Value::str(format_method(s, &args.positional, &args.keywords)?),
        "isdigit" | "isnumeric" | "isdecimal" => {
            Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
        }
        "isalpha" => Value::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic)),
        "isalnum" => Value::Bool(!s.is_empty() && s.chars().all(char::is_alphanumeric)),
        "isspace" => Value::Bool(!s.is_empty() && s.chars().all(char::is_whitespace)),
        "isupper" => Value::Bool(s.chars().any(char::is_alphabetic) && s == s.to_uppercase()),
        "islower" => Value::Bool(s.chars().any(char::is_alphabetic) && s == s.to_lowercase()),
        "zfill" => {
            let width = args.int_or(0, "width", 0)?;
            let (sign, digits) = match s.strip_prefix('-') {
                Some(rest) => ("-", rest),
                None => ("", s),
            };
            Value::str(format!("{}{}", sign, pad(digits, width - sign.len() as i64, '0', '>')))
        }
        "center" => Value::str(pad(s, args.int_or(0, "width", 0)?, fill_char(args)?, '^')),
        "ljust" => Value::str(pad(s, args.int_or(0, "width", 0)?, fill_char(args)?, '<')),
        "rjust" => Value::str(pad(s, args.int_or(0, "width", 0)?, fill_char(args)?, '>')),
        _ => return Err(no_method("str", name)),
    };
    Ok(out)
}

pub fn list_index(len: usize, value: &Value) -> ScriptResult<usize> {
    let i = value
        .as_int()
        .ok_or_else(|| ScriptError::type_error("list indices must be integers"))?;
    let idx = if i < 0 { i + len as i64 } else { i };
    if idx < 0 || idx as usize >= len {
        return Err(ScriptError::index("list index out of range"));
    }
    Ok(idx as usize)
}

/// Sort values in place; mixed incomparable types raise `TypeError`
pub fn sort_values(items: &mut [Value], reverse: bool) -> ScriptResult<()> {
    let mut failure = None;
    items.sort_by(|a, b| match a.compare(b) {
        Ok(ord) if reverse => ord.reverse(),
        Ok(ord) => ord,
        Err(e) => {
            failure.get_or_insert(e);
            std::cmp::Ordering::Equal
        }
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

pub fn list_method(list: &ListRef, name: &str, args: &Args) -> ScriptResult<Value> {
    let out = match name {
        "append" => {
            list.borrow_mut().push(args.require(0, "object", name)?.clone());
            Value::None
        }
        "extend" => {
            let items = args.require(0, "iterable", name)?.iter_values()?;
            list.borrow_mut().extend(items);
            Value::None
        }
        "insert" => {
            let at = args.int_or(0, "index", 0)?;
            let item = args.require(1, "object", name)?.clone();
            let mut items = list.borrow_mut();
            let len = items.len() as i64;
            let at = if at < 0 { (at + len).max(0) } else { at.min(len) };
            items.insert(at as usize, item);
            Value::None
        }
        "pop" => {
            let mut items = list.borrow_mut();
            if items.is_empty() {
                return Err(ScriptError::index("pop from empty list"));
            }
            let at = match args.get(0, "index") {
                Some(v) => list_index(items.len(), v)?,
                None => items.len() - 1,
            };
            items.remove(at)
        }
        "remove" => {
            let target = args.require(0, "value", name)?;
            let mut items = list.borrow_mut();
            let pos = items
                .iter()
                .position(|v| v.equals(target))
                .ok_or_else(|| ScriptError::value("list.remove(x): x not in list"))?;
            items.remove(pos);
            Value::None
        }
        "index" => {
            let target = args.require(0, "value", name)?;
            let pos = list
                .borrow()
                .iter()
                .position(|v| v.equals(target))
                .ok_or_else(|| ScriptError::value(format!("{} is not in list", target.repr())))?;
            Value::Int(pos as i64)
        }
        "count" => {
            let target = args.require(0, "value", name)?;
            Value::Int(list.borrow().iter().filter(|v| v.equals(target)).count() as i64)
        }
        "sort" => {
            let reverse = args.bool_or(99, "reverse", false)?;
            let mut items = list.borrow().clone();
            sort_values(&mut items, reverse)?;
            *list.borrow_mut() = items;
            Value::None
        }
        "reverse" => {
            list.borrow_mut().reverse();
            Value::None
        }
        "copy" => Value::list(list.borrow().clone()),
        "clear" => {
            list.borrow_mut().clear();
            Value::None
        }
        _ => return Err(no_method("list", name)),
    };
    Ok(out)
}

pub fn tuple_method(items: &[Value], name: &str, args: &Args) -> ScriptResult<Value> {
    let target = args.require(0, "value", name)?;
    match name {
        "count" => Ok(Value::Int(items.iter().filter(|v| v.equals(target)).count() as i64)),
        "index" => items
            .iter()
            .position(|v| v.equals(target))
            .map(|p| Value::Int(p as i64))
            .ok_or_else(|| ScriptError::value("tuple.index(x): x not in tuple")),
        _ => Err(no_method("tuple", name)),
    }
}

pub fn dict_method(dict: &DictRef, name: &str, args: &Args) -> ScriptResult<Value> {
    let out = match name {
        "get" => {
            let key = args.require(0, "key", name)?;
            let default = args.get(1, "default").cloned().unwrap_or(Value::None);
            dict.borrow().get(key).cloned().unwrap_or(default)
        }
        "keys" => Value::list(dict.borrow().keys().cloned().collect()),
        "values" => Value::list(dict.borrow().values().cloned().collect()),
        "items" => Value::list(
            dict.borrow()
                .entries()
                .iter()
                .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                .collect(),
        ),
        "update" => {
            let mut pairs: Vec<(Value, Value)> = match args.positional.first() {
                Some(Value::Dict(other)) => other.borrow().entries().to_vec(),
                Some(other) => pairs_of(other)?,
                None => Vec::new(),
            };
            pairs.extend(args.keywords.iter().map(|(k, v)| (Value::str(k.clone()), v.clone())));
            let mut target = dict.borrow_mut();
            for (k, v) in pairs {
                target.insert(k, v)?;
            }
            Value::None
        }
        "pop" => {
            let key = args.require(0, "key", name)?;
            let removed = dict.borrow_mut().remove(key);
            match (removed, args.get(1, "default")) {
                (Some(v), _) => v,
                (None, Some(default)) => default.clone(),
                (None, None) => return Err(ScriptError::key(key.repr())),
            }
        }
        "setdefault" => {
            let key = args.require(0, "key", name)?.clone();
            let default = args.get(1, "default").cloned().unwrap_or(Value::None);
            let existing = dict.borrow().get(&key).cloned();
            match existing {
                Some(v) => v,
                None => {
                    dict.borrow_mut().insert(key, default.clone())?;
                    default
                }
            }
        }
        "copy" => Value::dict(dict.borrow().clone()),
        "clear" => {
            *dict.borrow_mut() = Dict::new();
            Value::None
        }
        _ => return Err(no_method("dict", name)),
    };
    Ok(out)
}

/// Key/value pairs from an iterable of two-element sequences
pub fn pairs_of(value: &Value) -> ScriptResult<Vec<(Value, Value)>> {
    let mut out = Vec::new();
    for item in value.iter_values()? {
        let pair = item.iter_values()?;
        if pair.len() != 2 {
            return Err(ScriptError::value(format!(
                "dictionary update sequence element has length {}; 2 is required",
                pair.len()
            )));
        }
        out.push((pair[0].clone(), pair[1].clone()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_str(s: &str, name: &str, args: Vec<Value>) -> Value {
        str_method(s, name, &Args::positional(args)).unwrap()
    }

    #[test]
    fn test_string_methods() {
        assert_eq!(call_str("  East ", "strip", vec![]).to_display(), "East");
        assert_eq!(call_str("north america", "title", vec![]).to_display(), "North America");
        assert_eq!(
            call_str("a,b,,c", "split", vec![Value::str(",")]).repr(),
            "['a', 'b', '', 'c']"
        );
        assert_eq!(call_str("7", "zfill", vec![Value::Int(3)]).to_display(), "007");
        assert_eq!(call_str("wEST coast", "capitalize", vec![]).to_display(), "West coast");
        assert_eq!(call_str("", "capitalize", vec![]).to_display(), "");
        let joined = call_str("-", "join", vec![Value::list(vec![Value::str("x"), Value::str("y")])]);
        assert_eq!(joined.to_display(), "x-y");
    }

    #[test]
    fn test_join_rejects_non_strings() {
        let err = str_method(",", "join", &Args::positional(vec![Value::list(vec![Value::Int(1)])])).unwrap_err();
        assert!(err.message.contains("expected str instance"));
    }

    #[test]
    fn test_list_mutation_is_shared() {
        let value = Value::list(vec![Value::Int(3), Value::Int(1)]);
        let list = match &value {
            Value::List(l) => l.clone(),
            _ => unreachable!(),
        };
        list_method(&list, "append", &Args::positional(vec![Value::Int(2)])).unwrap();
        list_method(&list, "sort", &Args::default()).unwrap();
        assert_eq!(value.repr(), "[1, 2, 3]");
        let popped = list_method(&list, "pop", &Args::default()).unwrap();
        assert!(matches!(popped, Value::Int(3)));
    }

    #[test]
    fn test_dict_methods() {
        let value = Value::dict(Dict::new());
        let dict = match &value {
            Value::Dict(d) => d.clone(),
            _ => unreachable!(),
        };
        let args = Args::positional(vec![Value::str("East"), Value::Int(0)]);
        dict_method(&dict, "setdefault", &args).unwrap();
        let got = dict_method(&dict, "get", &Args::positional(vec![Value::str("West"), Value::Int(-1)])).unwrap();
        assert!(matches!(got, Value::Int(-1)));
        assert_eq!(dict_method(&dict, "items", &Args::default()).unwrap().repr(), "[('East', 0)]");
        assert!(dict_method(&dict, "pop", &Args::positional(vec![Value::str("nope")])).is_err());
    }
}
