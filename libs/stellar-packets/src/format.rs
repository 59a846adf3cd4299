//! printf-style rendering of item values for FORMATTED reads
//!
//! Supports the conversions used by telemetry format strings:
//! `d i u x X o b B e E f F g G s c %` with `-+ 0#` flags, width and precision.
//! Length modifiers (`l`, `h`, `q`, ...) are accepted and ignored.

use crate::error::{PacketError, Result};
use crate::value::Value;

#[derive(Debug, Default, Clone, Copy)]
struct Spec {
    left: bool,
    plus: bool,
    space: bool,
    zero: bool,
    alt: bool,
    width: Option<usize>,
    precision: Option<usize>,
    conv: char,
}

const CONVERSIONS: &str = "diuxXobBeEfFgGsc%";

/// True when `format` contains at least one conversion
pub fn is_valid_format(format: &str) -> bool {
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '%' {
            for next in chars.by_ref() {
                if CONVERSIONS.contains(next) {
                    return true;
                }
                if !(next.is_ascii_digit() || "-+ #.lhqLjzt".contains(next)) {
                    break;
                }
            }
        }
    }
    false
}

/// Render `value` through `format`
pub fn format_value(format: &str, value: &Value) -> Result<String> {
    let mut out = String::with_capacity(format.len() + 8);
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut spec = Spec::default();
        while let Some(&f) = chars.peek() {
            match f {
                '-' => spec.left = true,
                '+' => spec.plus = true,
                ' ' => spec.space = true,
                '0' => spec.zero = true,
                '#' => spec.alt = true,
                _ => break,
            }
            chars.next();
        }
        spec.width = take_number(&mut chars);
        if chars.peek() == Some(&'.') {
            chars.next();
            spec.precision = Some(take_number(&mut chars).unwrap_or(0));
        }
        while matches!(chars.peek(), Some('l' | 'h' | 'q' | 'L' | 'j' | 'z' | 't')) {
            chars.next();
        }
        let conv = chars.next().ok_or_else(|| {
            PacketError::Conversion(format!("format_string invalid '{}'", format))
        })?;
        spec.conv = conv;
        if conv == '%' {
            out.push('%');
            continue;
        }
        let body = render(&spec, value, format)?;
        out.push_str(&pad(&spec, body));
    }
    Ok(out)
}

fn take_number(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<usize> {
    let mut digits = String::new();
    while let Some(&d) = chars.peek() {
        if d.is_ascii_digit() {
            digits.push(d);
            chars.next();
        } else {
            break;
        }
    }
    digits.parse().ok()
}

fn integer_of(value: &Value, format: &str) -> Result<i128> {
    value.as_i128().ok_or_else(|| {
        PacketError::Conversion(format!(
            "invalid value {} for format string '{}'",
            value, format
        ))
    })
}

fn float_of(value: &Value, format: &str) -> Result<f64> {
    value.as_f64().ok_or_else(|| {
        PacketError::Conversion(format!(
            "invalid value {} for format string '{}'",
            value, format
        ))
    })
}

fn sign_prefix(spec: &Spec, negative: bool) -> &'static str {
    if negative {
        "-"
    } else if spec.plus {
        "+"
    } else if spec.space {
        " "
    } else {
        ""
    }
}

fn render(spec: &Spec, value: &Value, format: &str) -> Result<String> {
    let rendered = match spec.conv {
        'd' | 'i' | 'u' => {
            let v = integer_of(value, format)?;
            let mut digits = v.unsigned_abs().to_string();
            if let Some(p) = spec.precision {
                digits = format!("{:0>width$}", digits, width = p);
            }
            format!("{}{}", sign_prefix(spec, v < 0), digits)
        },
        'x' | 'X' | 'o' | 'b' | 'B' => {
            let v = integer_of(value, format)?;
            let magnitude = v.unsigned_abs();
            let (mut digits, prefix) = match spec.conv {
                'x' => (format!("{:x}", magnitude), "0x"),
                'X' => (format!("{:X}", magnitude), "0X"),
                'o' => (format!("{:o}", magnitude), "0"),
                'B' => (format!("{:b}", magnitude), "0B"),
                _ => (format!("{:b}", magnitude), "0b"),
            };
            if let Some(p) = spec.precision {
                digits = format!("{:0>width$}", digits, width = p);
            }
            let prefix = if spec.alt && magnitude != 0 { prefix } else { "" };
            format!("{}{}{}", sign_prefix(spec, v < 0), prefix, digits)
        },
        'f' | 'F' => {
            let v = float_of(value, format)?;
            let p = spec.precision.unwrap_or(6);
            format!("{}{:.*}", sign_prefix(spec, v < 0.0), p, v.abs())
        },
        'e' | 'E' => {
            let v = float_of(value, format)?;
            let body = exponential(v.abs(), spec.precision.unwrap_or(6), spec.conv == 'E');
            format!("{}{}", sign_prefix(spec, v < 0.0), body)
        },
        'g' | 'G' => {
            let v = float_of(value, format)?;
            let body = general(v.abs(), spec.precision.unwrap_or(6), spec.alt, spec.conv == 'G');
            format!("{}{}", sign_prefix(spec, v < 0.0), body)
        },
        's' => {
            let s = value.to_string();
            match spec.precision {
                Some(p) => s.chars().take(p).collect(),
                None => s,
            }
        },
        'c' => match value {
            Value::String(s) => s.chars().next().map(String::from).unwrap_or_default(),
            other => {
                let code = integer_of(other, format)?;
                char::from_u32(code as u32).map(String::from).unwrap_or_default()
            },
        },
        other => {
            return Err(PacketError::Conversion(format!(
                "unsupported conversion '%{}' in format string '{}'",
                other, format
            )))
        },
    };
    Ok(rendered)
}

/// C-style exponent: at least two digits with explicit sign
fn exponential(v: f64, precision: usize, upper: bool) -> String {
    let raw = format!("{:.*e}", precision, v);
    let (mantissa, exp) = raw.split_once('e').unwrap_or((raw.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let sign = if exp < 0 { '-' } else { '+' };
    let e = if upper { 'E' } else { 'e' };
    format!("{}{}{}{:02}", mantissa, e, sign, exp.abs())
}

fn general(v: f64, precision: usize, keep_zeros: bool, upper: bool) -> String {
    let p = precision.max(1);
    if v == 0.0 {
        return "0".to_string();
    }
    let exp = v.log10().floor() as i32;
    let body = if exp < -4 || exp >= p as i32 {
        let s = exponential(v, p - 1, upper);
        if keep_zeros {
            s
        } else {
            let split_at = s.find(['e', 'E']).unwrap_or(s.len());
            let (mantissa, rest) = s.split_at(split_at);
            format!("{}{}", strip_zeros(mantissa), rest)
        }
    } else {
        let decimals = (p as i32 - 1 - exp).max(0) as usize;
        let s = format!("{:.*}", decimals, v);
        if keep_zeros {
            s
        } else {
            strip_zeros(&s).to_string()
        }
    };
    body
}

fn strip_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

fn pad(spec: &Spec, body: String) -> String {
    let width = match spec.width {
        Some(w) if w > body.chars().count() => w,
        _ => return body,
    };
    let fill = width - body.chars().count();
    let numeric = !matches!(spec.conv, 's' | 'c');
    if spec.left {
        format!("{}{}", body, " ".repeat(fill))
    } else if spec.zero && numeric && (spec.precision.is_none() || "eEfFgG".contains(spec.conv)) {
        // Zeros go between the sign/radix prefix and the digits
        let sign_len = body.len() - body.trim_start_matches(['-', '+', ' ']).len();
        let radix_len = if spec.alt {
            radix_prefix_len(&body[sign_len..])
        } else {
            0
        };
        let (head, tail) = body.split_at(sign_len + radix_len);
        format!("{}{}{}", head, "0".repeat(fill), tail)
    } else {
        format!("{}{}", " ".repeat(fill), body)
    }
}

fn radix_prefix_len(s: &str) -> usize {
    if s.starts_with("0x") || s.starts_with("0X") || s.starts_with("0b") || s.starts_with("0B") {
        2
    } else {
        0
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_integer_formats() {
        assert_eq!(format_value("%d", &Value::Int(-5)).unwrap(), "-5");
        assert_eq!(format_value("%5d", &Value::Int(42)).unwrap(), "   42");
        assert_eq!(format_value("%-5d|", &Value::Int(42)).unwrap(), "42   |");
        assert_eq!(format_value("%05d", &Value::Int(-42)).unwrap(), "-0042");
        assert_eq!(format_value("0x%04X", &Value::UInt(0xAB)).unwrap(), "0x00AB");
        assert_eq!(format_value("%#x", &Value::UInt(255)).unwrap(), "0xff");
        assert_eq!(format_value("%#06x", &Value::UInt(255)).unwrap(), "0x00ff");
        assert_eq!(format_value("%o", &Value::UInt(8)).unwrap(), "10");
        assert_eq!(format_value("%d", &Value::Float(3.9)).unwrap(), "3");
    }

    #[test]
    fn test_float_formats() {
        assert_eq!(format_value("%5.1f", &Value::Float(3.14159)).unwrap(), "  3.1");
        assert_eq!(format_value("%.2f", &Value::Int(2)).unwrap(), "2.00");
        assert_eq!(format_value("%e", &Value::Float(1500.0)).unwrap(), "1.500000e+03");
        assert_eq!(format_value("%.2E", &Value::Float(0.00123)).unwrap(), "1.23E-03");
        assert_eq!(format_value("%g", &Value::Float(0.0001)).unwrap(), "0.0001");
        assert_eq!(format_value("%g", &Value::Float(123456789.0)).unwrap(), "1.23457e+08");
        assert_eq!(format_value("%g", &Value::Float(2.5)).unwrap(), "2.5");
        assert_eq!(format_value("%+.1f", &Value::Float(2.0)).unwrap(), "+2.0");
    }

    #[test]
    fn test_string_formats() {
        assert_eq!(format_value("%s units", &Value::from("abc")).unwrap(), "abc units");
        assert_eq!(format_value("%.2s", &Value::from("abc")).unwrap(), "ab");
        assert_eq!(format_value("%3s|", &Value::from("a")).unwrap(), "  a|");
        assert_eq!(format_value("100%%", &Value::Null).unwrap(), "100%");
        assert!(format_value("%d", &Value::from("abc")).is_err());
    }

    #[test]
    fn test_is_valid_format() {
        assert!(is_valid_format("%5.1f"));
        assert!(is_valid_format("0x%08X"));
        assert!(!is_valid_format("no conversion"));
        assert!(!is_valid_format("%"));
    }
}
