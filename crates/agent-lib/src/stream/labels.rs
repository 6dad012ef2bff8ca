//! Query construction and series name normalization

use super::{Dimension, RawSeries, SeriesPoint};

const SCOPE_SUFFIX: &str = ".scope";
const DOCKER_PREFIX: &str = "docker-";
const SHORT_ID_LEN: usize = 12;
const NAME_SELECTOR: &str = r#"name!="""#;

/// PromQL for a dimension, optionally narrowed to container names
/// containing `filter`
pub fn build_query(dimension: Dimension, filter: Option<&str>) -> String {
    let base = dimension.base_query();
    match filter.map(str::trim).filter(|f| !f.is_empty()) {
        None => base.to_string(),
        Some(filter) => {
            let escaped = filter.replace('\\', r"\\").replace('"', r#"\""#);
            base.replace(NAME_SELECTOR, &format!(r#"name=~".*{}.*""#, escaped))
        }
    }
}

/// Human-readable name for a raw container label
///
/// `/system.slice/docker-<hash>.scope` becomes the 12-character short id;
/// plain names are returned unchanged.
pub fn display_name(label: &str) -> String {
    let name = label.rsplit('/').next().unwrap_or(label);
    let name = name.strip_suffix(SCOPE_SUFFIX).unwrap_or(name);
    match name.strip_prefix(DOCKER_PREFIX) {
        Some(id) => id.chars().take(SHORT_ID_LEN).collect(),
        None => name.to_string(),
    }
}

/// Normalize names and drop series whose value is exactly zero
pub fn to_points(series: Vec<RawSeries>) -> Vec<SeriesPoint> {
    series
        .into_iter()
        .filter(|s| s.value != 0.0)
        .map(|s| SeriesPoint {
            name: display_name(&s.label),
            value: s.value,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_docker_scope() {
        assert_eq!(
            display_name("/system.slice/docker-ab12cd34ef56gh78.scope"),
            "ab12cd34ef56"
        );
    }

    #[test]
    fn test_display_name_plain_name_unchanged() {
        assert_eq!(display_name("my-service"), "my-service");
        assert_eq!(display_name("docker-short"), "short");
        assert_eq!(display_name("/kubepods/burstable/pod123/web"), "web");
    }

    #[test]
    fn test_build_query_without_filter() {
        assert_eq!(
            build_query(Dimension::Memory, None),
            r#"container_memory_working_set_bytes{image!="",name!=""}"#
        );
        assert_eq!(
            build_query(Dimension::Cpu, Some("  ")),
            Dimension::Cpu.base_query()
        );
    }

    #[test]
    fn test_build_query_with_filter() {
        assert_eq!(
            build_query(Dimension::NetRx, Some("web")),
            r#"rate(container_network_receive_bytes_total{image!="",name=~".*web.*"}[1m])"#
        );
        assert_eq!(
            build_query(Dimension::Memory, Some(r#"a"b"#)),
            r#"container_memory_working_set_bytes{image!="",name=~".*a\"b.*"}"#
        );
    }

    #[test]
    fn test_to_points_drops_zero_values() {
        let points = to_points(vec![
            RawSeries {
                label: "/docker-0123456789abcdef.scope".to_string(),
                value: 0.25,
            },
            RawSeries {
                label: "idle".to_string(),
                value: 0.0,
            },
        ]);
        assert_eq!(
            points,
            vec![SeriesPoint {
                name: "0123456789ab".to_string(),
                value: 0.25
            }]
        );
    }
}
