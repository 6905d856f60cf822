use std::collections::BTreeMap;

use super::MeterId;

/// Largest magnitude below which every integral `f64` is exact (2^53).
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

const GAUGE_TYPE: &str = "g";

/// Vendor dialect of the StatsD line protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StatsdFlavor {
    /// `name:value|g|#key:value,key2:value2`
    #[default]
    Datadog,
    /// `name.key.value.key2.value2:value|g`
    Etsy,
    /// `name,key=value,key2=value2:value|g`
    Telegraf,
}

impl StatsdFlavor {
    fn name_reserved(self) -> &'static [char] {
        match self {
            Self::Datadog => &[':', '|', '@', ',', '#'],
            Self::Etsy => &[':', '|', '@'],
            Self::Telegraf => &[':', '|', ',', '='],
        }
    }

    fn tag_key_reserved(self) -> &'static [char] {
        match self {
            Self::Datadog => &[':', '|', ',', '#'],
            Self::Etsy => &[':', '|', '@', '.'],
            Self::Telegraf => &[':', '|', ',', '='],
        }
    }

    fn tag_value_reserved(self) -> &'static [char] {
        match self {
            Self::Datadog => &['|', ','],
            Self::Etsy => &[':', '|', '@', '.'],
            Self::Telegraf => &[':', '|', ',', '='],
        }
    }
}

/// Pre-rendered line template for one meter.
///
/// The name, prefix and tags are sanitized once at construction; only the
/// value is rendered per call, so [`LineBuilder::gauge`] cannot fail.
#[derive(Debug, Clone)]
pub struct LineBuilder {
    head: String,
    tail: String,
}

impl LineBuilder {
    /// Builds the template for `id`.
    ///
    /// `prefix` is prepended verbatim to the name (include a trailing dot if
    /// desired). `common_tags` are applied first, so the identity's own tags
    /// override a common tag with the same key.
    #[must_use]
    pub fn new(
        id: &MeterId,
        flavor: StatsdFlavor,
        prefix: &str,
        common_tags: &[(String, String)],
    ) -> Self {
        let mut tags: BTreeMap<&str, &str> = common_tags
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        tags.extend(id.tags());

        let mut head = String::with_capacity(prefix.len() + id.name().len() + 16 * tags.len());
        sanitize_into(&mut head, prefix, flavor.name_reserved());
        sanitize_into(&mut head, id.name(), flavor.name_reserved());

        let mut tail = String::with_capacity(2 + 16 * tags.len());
        tail.push('|');
        tail.push_str(GAUGE_TYPE);

        match flavor {
            StatsdFlavor::Datadog => {
                let mut first = true;
                for (key, value) in tags {
                    tail.push_str(if first { "|#" } else { "," });
                    first = false;
                    sanitize_into(&mut tail, key, flavor.tag_key_reserved());
                    tail.push(':');
                    sanitize_into(&mut tail, value, flavor.tag_value_reserved());
                }
            }
            StatsdFlavor::Etsy => {
                for (key, value) in tags {
                    head.push('.');
                    sanitize_into(&mut head, key, flavor.tag_key_reserved());
                    head.push('.');
                    sanitize_into(&mut head, value, flavor.tag_value_reserved());
                }
            }
            StatsdFlavor::Telegraf => {
                for (key, value) in tags {
                    head.push(',');
                    sanitize_into(&mut head, key, flavor.tag_key_reserved());
                    head.push('=');
                    sanitize_into(&mut head, value, flavor.tag_value_reserved());
                }
            }
        }

        Self { head, tail }
    }

    /// Renders one gauge line for `value`, without a line terminator.
    #[must_use]
    pub fn gauge(&self, value: f64) -> String {
        let mut line = String::with_capacity(self.head.len() + self.tail.len() + 25);
        line.push_str(&self.head);
        line.push(':');
        push_value(&mut line, value);
        line.push_str(&self.tail);
        line
    }
}

/// Encodes one gauge line for `id` without prefix or common tags.
///
/// # Example
///
/// ```
/// use statsd_pollable::{encode_gauge, MeterId, StatsdFlavor};
///
/// let id = MeterId::new("cpu.usage").with_tag("host", "a");
/// assert_eq!(encode_gauge(StatsdFlavor::Telegraf, &id, 0.42), "cpu.usage,host=a:0.42|g");
/// assert_eq!(encode_gauge(StatsdFlavor::Datadog, &id, 0.42), "cpu.usage:0.42|g|#host:a");
/// ```
#[must_use]
pub fn encode_gauge(flavor: StatsdFlavor, id: &MeterId, value: f64) -> String {
    LineBuilder::new(id, flavor, "", &[]).gauge(value)
}

// Integral values print without a fraction; everything else goes through ryu,
// which is locale independent and prints NaN/inf/-inf for non-finite input.
fn push_value(buf: &mut String, value: f64) {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < MAX_EXACT_INTEGER {
        let mut buffer = itoa::Buffer::new();
        #[allow(clippy::cast_possible_truncation)]
        buf.push_str(buffer.format(value as i64));
    } else {
        let mut buffer = ryu::Buffer::new();
        buf.push_str(buffer.format(value));
    }
}

fn sanitize_into(buf: &mut String, s: &str, reserved: &[char]) {
    for c in s.chars() {
        if c.is_control() || c.is_whitespace() || reserved.contains(&c) {
            buf.push('_');
        } else {
            buf.push(c);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu() -> MeterId {
        MeterId::new("cpu.usage").with_tag("host", "a")
    }

    #[test]
    fn test_gauge_line_per_flavor() {
        assert_eq!(
            encode_gauge(StatsdFlavor::Datadog, &cpu(), 0.42),
            "cpu.usage:0.42|g|#host:a"
        );
        assert_eq!(
            encode_gauge(StatsdFlavor::Telegraf, &cpu(), 0.42),
            "cpu.usage,host=a:0.42|g"
        );
        assert_eq!(
            encode_gauge(StatsdFlavor::Etsy, &cpu(), 0.42),
            "cpu.usage.host.a:0.42|g"
        );
    }

    #[test]
    fn test_gauge_line_without_tags() {
        let id = MeterId::new("threads.running");
        assert_eq!(encode_gauge(StatsdFlavor::Datadog, &id, 8.0), "threads.running:8|g");
        assert_eq!(encode_gauge(StatsdFlavor::Telegraf, &id, 8.0), "threads.running:8|g");
        assert_eq!(encode_gauge(StatsdFlavor::Etsy, &id, 8.0), "threads.running:8|g");
    }

    #[test]
    fn test_tags_are_sorted_by_key() {
        let id = MeterId::new("m").with_tags([("zone", "1"), ("app", "web")]);
        assert_eq!(
            encode_gauge(StatsdFlavor::Datadog, &id, 1.0),
            "m:1|g|#app:web,zone:1"
        );
        assert_eq!(
            encode_gauge(StatsdFlavor::Telegraf, &id, 1.0),
            "m,app=web,zone=1:1|g"
        );
    }

    #[test]
    fn test_value_formatting() {
        let id = MeterId::new("m");
        let render = |v: f64| encode_gauge(StatsdFlavor::Datadog, &id, v);

        assert_eq!(render(3.0), "m:3|g");
        assert_eq!(render(-2.5), "m:-2.5|g");
        assert_eq!(render(0.0), "m:0|g");
        assert_eq!(render(-0.0), "m:0|g");
        assert_eq!(render(1_000_000.0), "m:1000000|g");
        assert_eq!(render(f64::NAN), "m:NaN|g");
        assert_eq!(render(f64::INFINITY), "m:inf|g");
        assert_eq!(render(f64::NEG_INFINITY), "m:-inf|g");
    }

    #[test]
    fn test_large_values_round_trip() {
        let id = MeterId::new("m");
        for v in [1e20, 9_007_199_254_740_992.0, 1.5e-9, f64::MAX, f64::MIN_POSITIVE] {
            let line = encode_gauge(StatsdFlavor::Telegraf, &id, v);
            let rendered = &line["m:".len()..line.len() - "|g".len()];
            assert_eq!(rendered.parse::<f64>().unwrap(), v, "line: {line}");
        }
    }

    #[test]
    fn test_line_terminators_are_replaced() {
        let id = MeterId::new("bad\nname").with_tag("k\r", "v\nx");
        for flavor in [StatsdFlavor::Datadog, StatsdFlavor::Etsy, StatsdFlavor::Telegraf] {
            let line = encode_gauge(flavor, &id, 1.0);
            assert!(!line.contains('\n'), "{flavor:?}: {line}");
            assert!(!line.contains('\r'), "{flavor:?}: {line}");
            assert!(line.starts_with("bad_name"), "{flavor:?}: {line}");
        }
    }

    #[test]
    fn test_reserved_characters_are_replaced() {
        let id = MeterId::new("a:b|c").with_tag("k=1", "v,2");
        assert_eq!(
            encode_gauge(StatsdFlavor::Telegraf, &id, 1.0),
            "a_b_c,k_1=v_2:1|g"
        );
        assert_eq!(
            encode_gauge(StatsdFlavor::Datadog, &id, 1.0),
            "a_b_c:1|g|#k=1:v_2"
        );

        let id = MeterId::new("svc").with_tag("path", "/api/v1.2");
        assert_eq!(
            encode_gauge(StatsdFlavor::Etsy, &id, 1.0),
            "svc.path./api/v1_2:1|g"
        );
    }

    #[test]
    fn test_prefix_and_common_tags() {
        let common = vec![
            ("env".to_string(), "prod".to_string()),
            ("host".to_string(), "common".to_string()),
        ];
        let builder = LineBuilder::new(&cpu(), StatsdFlavor::Datadog, "myapp.", &common);

        assert_eq!(builder.gauge(1.0), "myapp.cpu.usage:1|g|#env:prod,host:a");
    }
}
