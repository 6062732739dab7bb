use std::fmt::{self, Write};

use super::{KEY_SPECIALS, LEADING_NAME_SPECIALS, NAME_SPECIALS};
use crate::{FieldValue, Point};

pub(crate) fn write_point<W: Write>(w: &mut W, point: &Point) -> fmt::Result {
    if point.name().starts_with(LEADING_NAME_SPECIALS) {
        w.write_char('\\')?;
    }
    write_escaped(w, point.name(), NAME_SPECIALS)?;

    for (key, value) in point.tags() {
        w.write_char(',')?;
        write_escaped(w, key, KEY_SPECIALS)?;
        w.write_char('=')?;
        write_escaped(w, value, KEY_SPECIALS)?;
    }

    let mut sep = ' ';
    for (key, value) in point.fields() {
        w.write_char(sep)?;
        sep = ',';

        write_escaped(w, key, KEY_SPECIALS)?;
        w.write_char('=')?;
        write_field_value(w, value)?;
    }

    write!(w, " {}", point.time())
}

fn write_escaped<W: Write>(w: &mut W, value: &str, specials: &[char]) -> fmt::Result {
    for c in value.chars() {
        if specials.contains(&c) {
            w.write_char('\\')?;
        }
        w.write_char(c)?;
    }
    Ok(())
}

fn write_field_value<W: Write>(w: &mut W, value: &FieldValue) -> fmt::Result {
    match value {
        FieldValue::Int(v) => write!(w, "{}i", v),
        FieldValue::UInt(v) => write!(w, "{}u", v),
        FieldValue::Float(v) => write!(w, "{}", v),
        FieldValue::Bool(v) => write!(w, "{}", v),
        FieldValue::String(s) => {
            w.write_char('"')?;
            for c in s.chars() {
                if c == '"' || c == '\\' {
                    w.write_char('\\')?;
                }
                w.write_char(c)?;
            }
            w.write_char('"')
        }
    }
}
