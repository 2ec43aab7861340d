//! Argument builders for the two external tools.
//!
//! * convert: `osmconvert --timestamp=<ts> <snapshot> -o=<output>`
//! * update:  `pyosmium-up-to-date --server <base>/<cadence>/ <artifact>`

/// Arguments that re-stamp `snapshot` with `timestamp`, writing `output`.
pub fn convert_args(timestamp: &str, snapshot: &str, output: &str) -> Vec<String> {
    vec![
        format!("--timestamp={timestamp}"),
        snapshot.to_string(),
        format!("-o={output}"),
    ]
}

/// Arguments that bring `artifact` up to date from the `cadence` directory of
/// the replication server at `base_update_address`.
pub fn update_args(base_update_address: &str, cadence: &str, artifact: &str) -> Vec<String> {
    vec![
        "--server".to_string(),
        replication_url(base_update_address, cadence),
        artifact.to_string(),
    ]
}

pub fn replication_url(base_update_address: &str, cadence: &str) -> String {
    format!("{}/{cadence}/", base_update_address.trim_end_matches('/'))
}
