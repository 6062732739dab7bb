//! Line protocol codec.
//!
//! ```text
//! name[,tag=value...] field=value[,field=value...] [timestamp]
//! ```
//!
//! Names escape `,` and space with a backslash, plus a leading `#` or tab; tag keys, tag values and field keys
//! additionally escape `=`. A backslash is itself escaped in all of them. Field values are `123i` (signed), `123u`
//! (unsigned), bare numbers (float), `true`/`false`, or double-quoted strings. Timestamps are nanoseconds since the
//! Unix epoch.

mod decode;
pub use self::decode::{parse, parse_with_default_time, ParseError};

mod encode;
pub(crate) use self::encode::write_point;

/// Characters escaped in a point name.
const NAME_SPECIALS: &[char] = &['\\', ',', ' '];

/// Characters escaped in tag keys, tag values, and field keys.
const KEY_SPECIALS: &[char] = &['\\', ',', '=', ' '];

/// Characters escaped only when they start a point name, where they would read as a comment or be skipped.
const LEADING_NAME_SPECIALS: &[char] = &['#', '\t'];

#[cfg(test)]
mod tests {
    use proptest::{collection::btree_map, prelude::*};

    use super::*;
    use crate::{FieldValue, Point};

    fn arb_key() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9_ ,=\\\\.#\t-]{1,12}"
    }

    fn arb_field_value() -> impl Strategy<Value = FieldValue> {
        prop_oneof![
            any::<i64>().prop_map(FieldValue::Int),
            any::<u64>().prop_map(FieldValue::UInt),
            any::<f64>()
                .prop_filter("finite", |v| v.is_finite())
                .prop_map(FieldValue::Float),
            any::<bool>().prop_map(FieldValue::Bool),
            "[ -~\n]{0,24}".prop_map(FieldValue::String),
        ]
    }

    fn arb_point() -> impl Strategy<Value = Point> {
        (
            arb_key(),
            btree_map(arb_key(), arb_key(), 0..4),
            btree_map(arb_key(), arb_field_value(), 1..5),
            any::<i64>(),
        )
            .prop_map(|(name, tags, fields, time)| {
                let mut builder = Point::builder(name).with_time(time);
                for (k, v) in tags {
                    builder = builder.with_tag(k, v);
                }
                for (k, v) in fields {
                    builder = builder.with_field(k, v);
                }
                builder.build().expect("generated point should be valid")
            })
    }

    proptest! {
        #[test]
        fn property_test_round_trip(points in prop::collection::vec(arb_point(), 1..16)) {
            let encoded = points.iter().map(Point::to_line_protocol).collect::<Vec<_>>().join("\n");
            let decoded = parse(&encoded).expect("encoded points should parse");

            prop_assert_eq!(&decoded, &points);
            let reencoded = decoded.iter().map(Point::to_line_protocol).collect::<Vec<_>>().join("\n");
            prop_assert_eq!(reencoded, encoded);
        }
    }

    #[test]
    fn encode_escapes() {
        let point = Point::builder("cpu load")
            .with_tag("host,name", "web=1")
            .with_field("msg", "say \"hi\" \\o/")
            .with_field("n", -3i64)
            .with_field("u", 3u64)
            .with_field("f", 1.0)
            .with_field("ok", true)
            .with_time(1_700_000_000_000_000_000)
            .build()
            .unwrap();

        assert_eq!(
            point.to_line_protocol(),
            "cpu\\ load,host\\,name=web\\=1 f=1,msg=\"say \\\"hi\\\" \\\\o/\",n=-3i,ok=true,u=3u 1700000000000000000"
        );
    }

    #[test]
    fn parse_skips_blank_and_comment_lines() {
        let input = "# comment\n\ncpu,host=a usage=1.5 10\r\nmem free=2i 20\n";
        let points = parse(input).unwrap();

        assert_eq!(points.len(), 2);
        assert_eq!(points[0].get_tag("host"), Some("a"));
        assert_eq!(points[0].get_field("usage"), Some(&FieldValue::Float(1.5)));
        assert_eq!(points[1].get_field("free"), Some(&FieldValue::Int(2)));
        assert_eq!(points[1].time(), 20);
    }

    #[test]
    fn names_starting_like_comments() {
        for name in ["#cpu", "\tcpu", "#", "\\#cpu"] {
            let point = Point::builder(name).with_field("v", 1i64).with_time(5).build().unwrap();
            let line = point.to_line_protocol();

            assert_eq!(parse(&line).unwrap(), vec![point], "line: {:?}", line);
        }

        let point = Point::builder("#cpu").with_field("v", 1i64).with_time(5).build().unwrap();
        assert_eq!(point.to_line_protocol(), "\\#cpu v=1i 5");
    }

    #[test]
    fn parse_uses_default_time() {
        let points = parse_with_default_time("cpu usage=1", 99).unwrap();
        assert_eq!(points[0].time(), 99);
    }

    #[test]
    fn parse_multiline_string_field() {
        let points = parse("log message=\"line one\nline two\" 1\nlog message=\"x\" 2").unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(
            points[0].get_field("message"),
            Some(&FieldValue::String("line one\nline two".to_string()))
        );
    }

    #[test]
    fn parse_rejects_malformed() {
        for input in [
            "cpu",
            "cpu ",
            "cpu usage",
            "cpu usage=",
            "cpu usage=1.5i",
            "cpu usage=\"open",
            "cpu,host usage=1",
            "cpu usage=1 notatime",
            "cpu usage=99999999999999999999i",
        ] {
            assert!(parse(input).is_err(), "input should be rejected: {:?}", input);
        }
    }
}
