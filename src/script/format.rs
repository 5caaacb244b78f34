//! String formatting
//!
//! Format specs for f-strings and `str.format`, plus `%` interpolation.

use super::error::{ScriptError, ScriptResult};
use super::value::Value;

#[derive(Debug, Default)]
struct FormatSpec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    zero: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

fn parse_spec(spec: &str) -> ScriptResult<FormatSpec> {
    let chars: Vec<char> = spec.chars().collect();
    let mut out = FormatSpec::default();
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');

    if chars.len() >= 2 && is_align(chars[1]) {
        out.fill = Some(chars[0]);
        out.align = Some(chars[1]);
        i = 2;
    } else if !chars.is_empty() && is_align(chars[0]) {
        out.align = Some(chars[0]);
        i = 1;
    }
    if i < chars.len() && matches!(chars[i], '+' | '-' | ' ') {
        out.sign = Some(chars[i]);
        i += 1;
    }
    if i < chars.len() && chars[i] == '#' {
        i += 1;
    }
    if i < chars.len() && chars[i] == '0' {
        out.zero = true;
        i += 1;
    }
    let start = i;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if i > start {
        out.width = chars[start..i].iter().collect::<String>().parse().unwrap_or(0);
    }
    if i < chars.len() && matches!(chars[i], ',' | '_') {
        out.grouping = Some(chars[i]);
        i += 1;
    }
    if i < chars.len() && chars[i] == '.' {
        i += 1;
        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        if i == start {
            return Err(ScriptError::value("Format specifier missing precision"));
        }
        out.precision = chars[start..i].iter().collect::<String>().parse().ok();
    }
    if i < chars.len() {
        out.kind = Some(chars[i]);
        i += 1;
    }
    if i != chars.len() {
        return Err(ScriptError::value(format!("Invalid format specifier '{}'", spec)));
    }
    Ok(out)
}

fn group_digits(body: &str, sep: char) -> String {
    let (sign, rest) = match body.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", body),
    };
    let split = rest.find(|c: char| c == '.' || c == 'e' || c == 'E').unwrap_or(rest.len());
    let (int_part, tail) = rest.split_at(split);
    if !int_part.chars().all(|c| c.is_ascii_digit()) {
        return body.to_string();
    }
    let mut grouped = String::new();
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(sep);
        }
        grouped.push(c);
    }
    format!("{}{}{}", sign, grouped, tail)
}

fn python_exponent(text: &str) -> String {
    match text.split_once(['e', 'E']) {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exp.abs())
        }
        None => text.to_string(),
    }
}

fn general(x: f64, precision: usize) -> String {
    if x == 0.0 {
        return "0".to_string();
    }
    if !x.is_finite() {
        return crate::frame::cells::format_float(x);
    }
    let p = precision.max(1);
    let exp = x.abs().log10().floor() as i32;
    let text = if exp < -4 || exp >= p as i32 {
        python_exponent(&format!("{:.*e}", p - 1, x))
    } else {
        format!("{:.*}", (p as i32 - 1 - exp).max(0) as usize, x)
    };
    // drop trailing zeros of the fractional part
    match text.split_once('e') {
        Some((mantissa, exp)) if mantissa.contains('.') => format!(
            "{}e{}",
            mantissa.trim_end_matches('0').trim_end_matches('.'),
            exp
        ),
        _ if text.contains('.') => text.trim_end_matches('0').trim_end_matches('.').to_string(),
        _ => text,
    }
}

fn require_number(value: &Value, kind: char) -> ScriptResult<f64> {
    value.as_f64().ok_or_else(|| {
        ScriptError::value(format!(
            "Unknown format code '{}' for object of type '{}'",
            kind,
            value.type_name()
        ))
    })
}

/// Apply a format spec such as `,.2f` or `>10`
pub fn format_value(value: &Value, spec: &str) -> ScriptResult<String> {
    if spec.is_empty() {
        return Ok(value.to_display());
    }
    let spec = parse_spec(spec)?;
    let numeric = value.is_number();

    let mut body = match spec.kind {
        Some('f') | Some('F') => {
            let x = require_number(value, 'f')?;
            format!("{:.*}", spec.precision.unwrap_or(6), x)
        }
        Some('%') => {
            let x = require_number(value, '%')?;
            format!("{:.*}%", spec.precision.unwrap_or(6), x * 100.0)
        }
        Some('e') | Some('E') => {
            let x = require_number(value, 'e')?;
            let text = python_exponent(&format!("{:.*e}", spec.precision.unwrap_or(6), x));
            if spec.kind == Some('E') {
                text.to_uppercase()
            } else {
                text
            }
        }
        Some('g') | Some('G') => general(require_number(value, 'g')?, spec.precision.unwrap_or(6)),
        Some('d') | Some('n') => match value {
            Value::Int(i) => i.to_string(),
            Value::Bool(b) => (*b as i64).to_string(),
            other => {
                return Err(ScriptError::value(format!(
                    "Unknown format code 'd' for object of type '{}'",
                    other.type_name()
                )))
            }
        },
        Some('x') => match value.as_int() {
            Some(i) => format!("{:x}", i),
            None => return Err(ScriptError::value("Unknown format code 'x'")),
        },
        Some('s') => {
            let text = value.to_display();
            match spec.precision {
                Some(p) => text.chars().take(p).collect(),
                None => text,
            }
        }
        None => match (value, spec.precision) {
            (Value::Float(f), Some(p)) => general(*f, p),
            (Value::Str(s), Some(p)) => s.chars().take(p).collect(),
            _ => value.to_display(),
        },
        Some(other) => {
            return Err(ScriptError::value(format!(
                "Unknown format code '{}' for object of type '{}'",
                other,
                value.type_name()
            )))
        }
    };

    if numeric {
        if let Some(sep) = spec.grouping {
            body = group_digits(&body, sep);
        }
        if !body.starts_with('-') {
            match spec.sign {
                Some('+') => body.insert(0, '+'),
                Some(' ') => body.insert(0, ' '),
                _ => {}
            }
        }
    }

    let len = body.chars().count();
    if len >= spec.width {
        return Ok(body);
    }
    let pad = spec.width - len;
    let (fill, align) = if spec.zero && spec.align.is_none() && numeric {
        ('0', '=')
    } else {
        (
            spec.fill.unwrap_or(' '),
            spec.align.unwrap_or(if numeric { '>' } else { '<' }),
        )
    };
    let padding = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
    Ok(match align {
        '<' => format!("{}{}", body, padding(pad)),
        '^' => format!("{}{}{}", padding(pad / 2), body, padding(pad - pad / 2)),
        '=' => {
            let sign_len = if body.starts_with(['-', '+', ' ']) { 1 } else { 0 };
            let (sign, digits) = body.split_at(sign_len);
            format!("{}{}{}", sign, padding(pad), digits)
        }
        _ => format!("{}{}", padding(pad), body),
    })
}

/// `template.format(*args, **kwargs)`
pub fn format_method(template: &str, args: &[Value], kwargs: &[(String, Value)]) -> ScriptResult<String> {
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::new();
    let mut auto_index = 0usize;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '{' && chars.get(i + 1) == Some(&'{') {
            out.push('{');
            i += 2;
            continue;
        }
        if c == '}' && chars.get(i + 1) == Some(&'}') {
            out.push('}');
            i += 2;
            continue;
        }
        if c != '{' {
            out.push(c);
            i += 1;
            continue;
        }
        let close = chars[i..]
            .iter()
            .position(|&d| d == '}')
            .map(|p| p + i)
            .ok_or_else(|| ScriptError::value("Single '{' encountered in format string"))?;
        let field: String = chars[i + 1..close].iter().collect();
        let (name, spec) = match field.split_once(':') {
            Some((name, spec)) => (name.to_string(), spec.to_string()),
            None => (field.clone(), String::new()),
        };
        let name = name.trim_end_matches("!r").trim_end_matches("!s").to_string();
        let value = if name.is_empty() {
            let v = args.get(auto_index).ok_or_else(|| {
                ScriptError::index("Replacement index out of range for positional args tuple")
            })?;
            auto_index += 1;
            v
        } else if let Ok(idx) = name.parse::<usize>() {
            args.get(idx).ok_or_else(|| {
                ScriptError::index("Replacement index out of range for positional args tuple")
            })?
        } else {
            kwargs
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v)
                .ok_or_else(|| ScriptError::key(format!("'{}'", name)))?
        };
        out.push_str(&format_value(value, &spec)?);
        i = close + 1;
    }
    Ok(out)
}

/// `template % args`
pub fn percent_format(template: &str, args: &Value) -> ScriptResult<String> {
    let args: Vec<Value> = match args {
        Value::Tuple(items) => items.as_ref().clone(),
        other => vec![other.clone()],
    };
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::new();
    let mut next = 0usize;
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '%' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        if chars.get(i + 1) == Some(&'%') {
            out.push('%');
            i += 2;
            continue;
        }
        let start = i + 1;
        let mut j = start;
        while j < chars.len() && !chars[j].is_ascii_alphabetic() {
            j += 1;
        }
        let conversion = *chars
            .get(j)
            .ok_or_else(|| ScriptError::value("incomplete format"))?;
        let flags: String = chars[start..j].iter().collect();
        let value = args
            .get(next)
            .ok_or_else(|| ScriptError::type_error("not enough arguments for format string"))?;
        next += 1;
        let text = match conversion {
            's' => format_value(&Value::Str(value.to_display()), &flags)?,
            'r' => format_value(&Value::Str(value.repr()), &flags)?,
            'i' | 'u' => format_value(&Value::Int(int_like(value)?), &format!("{}d", flags))?,
            'd' => format_value(&Value::Int(int_like(value)?), &format!("{}d", flags))?,
            other => format_value(value, &format!("{}{}", flags, other))?,
        };
        out.push_str(&text);
        i = j + 1;
    }
    if next < args.len() {
        return Err(ScriptError::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}

fn int_like(value: &Value) -> ScriptResult<i64> {
    match value {
        Value::Float(f) => Ok(f.trunc() as i64),
        other => other.as_int().ok_or_else(|| {
            ScriptError::type_error(format!(
                "%d format: a real number is required, not {}",
                other.type_name()
            ))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_specs() {
        assert_eq!(format_value(&Value::Float(1234.5678), ",.2f").unwrap(), "1,234.57");
        assert_eq!(format_value(&Value::Int(1234567), ",").unwrap(), "1,234,567");
        assert_eq!(format_value(&Value::Float(0.256), ".1%").unwrap(), "25.6%");
        assert_eq!(format_value(&Value::str("ab"), ">4").unwrap(), "  ab");
        assert_eq!(format_value(&Value::Int(7), "03d").unwrap(), "007");
        assert_eq!(format_value(&Value::Float(12345.678), ".3g").unwrap(), "1.23e+04");
    }

    #[test]
    fn test_format_method() {
        let text = format_method(
            "{} sold {total:,.0f} ({0})",
            &[Value::str("East")],
            &[("total".to_string(), Value::Float(1500.0))],
        )
        .unwrap();
        assert_eq!(text, "East sold 1,500 (East)");
    }

    #[test]
    fn test_percent_format() {
        let args = Value::tuple(vec![Value::str("West"), Value::Float(3.14159)]);
        assert_eq!(percent_format("%s: %.2f", &args).unwrap(), "West: 3.14");
        assert!(percent_format("%s %s", &Value::str("x")).is_err());
    }

    #[test]
    fn test_bad_code_for_strings() {
        assert!(format_value(&Value::str("x"), ".2f").is_err());
    }
}
