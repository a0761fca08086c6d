use std::path::PathBuf;

use crate::model::{Extents, Modality};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    pub name: String,
    pub extents: Extents,
    pub modality: Modality,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub id: String,
    pub steps: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchRequest {
    pub config_path: Option<PathBuf>,
    pub volumes: Vec<VolumeSpec>,
    pub jobs: Vec<JobSpec>,
}

pub fn parse_launch_request_from_args(args: &[String]) -> Result<LaunchRequest, String> {
    if args.len() == 1 && is_voxview_uri(&args[0]) {
        return parse_voxview_uri(&args[0]);
    }

    let mut request = LaunchRequest::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut value_for = |flag: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| format!("Missing value after {flag}."))
        };
        match arg.as_str() {
            "--config" => request.config_path = Some(PathBuf::from(value_for("--config")?)),
            "--volume" => request.volumes.push(parse_volume_spec(&value_for("--volume")?)?),
            "--job" => request.jobs.push(parse_job_spec(&value_for("--job")?)?),
            other => return Err(format!("Unrecognized argument {other:?}.")),
        }
    }
    Ok(request)
}

/// `voxview://session?volume=brain:64x64x40:CT&job=seg:12&config=%2Fetc%2Fvoxview.toml`
pub fn parse_voxview_uri(uri: &str) -> Result<LaunchRequest, String> {
    let rest = strip_voxview_scheme(uri).ok_or_else(|| "URL must start with voxview://".to_string())?;
    let (location, query) = split_location_and_query(rest);
    let location = location.trim().trim_matches('/');
    if !location.is_empty() && !location.eq_ignore_ascii_case("session") {
        return Err(format!("Unsupported voxview:// location {location:?}."));
    }

    let mut request = LaunchRequest::default();
    let Some(query_string) = query else {
        return Ok(request);
    };

    for pair in query_string.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = key.trim().to_ascii_lowercase();
        let decoded_value = percent_decode(value)?;
        match key.as_str() {
            "config" => {
                if !decoded_value.trim().is_empty() {
                    request.config_path = Some(PathBuf::from(decoded_value));
                }
            }
            "volume" | "volumes" => {
                for spec in decoded_value.split(';').filter(|spec| !spec.trim().is_empty()) {
                    request.volumes.push(parse_volume_spec(spec)?);
                }
            }
            "job" | "jobs" => {
                for spec in decoded_value.split(';').filter(|spec| !spec.trim().is_empty()) {
                    request.jobs.push(parse_job_spec(spec)?);
                }
            }
            _ => {}
        }
    }

    Ok(request)
}

/// `name:XxYxZ[:modality]`
pub fn parse_volume_spec(spec: &str) -> Result<VolumeSpec, String> {
    let mut parts = spec.trim().split(':');
    let name = parts
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| format!("Volume spec {spec:?} is missing a name."))?;
    let dims = parts
        .next()
        .ok_or_else(|| format!("Volume spec {spec:?} is missing dimensions."))?;
    let modality = parts.next().map(str::trim).filter(|m| !m.is_empty()).unwrap_or("CT");
    if parts.next().is_some() {
        return Err(format!("Volume spec {spec:?} has too many fields."));
    }

    let values = dims
        .split(|ch| ch == 'x' || ch == 'X')
        .map(|value| value.trim().parse::<usize>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| format!("Volume dimensions {dims:?} must be three integers."))?;
    let [x, y, z] = values.as_slice() else {
        return Err(format!("Volume dimensions {dims:?} must be three integers."));
    };
    let extents = Extents::new(*x, *y, *z);
    if extents.is_empty() {
        return Err(format!("Volume {name:?} has an empty dimension."));
    }

    Ok(VolumeSpec {
        name: name.to_string(),
        extents,
        modality: Modality::new(modality),
    })
}

/// `id:steps`
pub fn parse_job_spec(spec: &str) -> Result<JobSpec, String> {
    let (id, steps) = spec
        .trim()
        .split_once(':')
        .ok_or_else(|| format!("Job spec {spec:?} must look like id:steps."))?;
    let id = id.trim();
    if id.is_empty() {
        return Err(format!("Job spec {spec:?} is missing an id."));
    }
    let steps = steps
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("Job spec {spec:?} has an invalid step count."))?;
    Ok(JobSpec {
        id: id.to_string(),
        steps,
    })
}

fn is_voxview_uri(value: &str) -> bool {
    strip_voxview_scheme(value).is_some()
}

fn strip_voxview_scheme(uri: &str) -> Option<&str> {
    let prefix = "voxview://";
    if uri.len() >= prefix.len() && uri[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&uri[prefix.len()..])
    } else {
        None
    }
}

fn split_location_and_query(value: &str) -> (&str, Option<&str>) {
    if let Some((location, query)) = value.split_once('?') {
        (location, Some(query))
    } else {
        (value, None)
    }
}

fn percent_decode(value: &str) -> Result<String, String> {
    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        match bytes[index] {
            b'+' => {
                decoded.push(b' ');
                index += 1;
            }
            b'%' => {
                if index + 2 >= bytes.len() {
                    return Err("Invalid percent-encoding in URL.".to_string());
                }
                let hi = decode_hex_digit(bytes[index + 1])
                    .ok_or_else(|| "Invalid percent-encoding in URL.".to_string())?;
                let lo = decode_hex_digit(bytes[index + 2])
                    .ok_or_else(|| "Invalid percent-encoding in URL.".to_string())?;
                decoded.push((hi << 4) | lo);
                index += 3;
            }
            byte => {
                decoded.push(byte);
                index += 1;
            }
        }
    }

    String::from_utf8(decoded).map_err(|_| "URL contains invalid UTF-8 after decoding.".to_string())
}

fn decode_hex_digit(value: u8) -> Option<u8> {
    match value {
        b'0'..=b'9' => Some(value - b'0'),
        b'a'..=b'f' => Some(value - b'a' + 10),
        b'A'..=b'F' => Some(value - b'A' + 10),
        _ => None,
    }
}
