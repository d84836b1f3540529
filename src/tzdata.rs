//! Trimming of packed timezone data to a year range.
//!
//! The packed format stores one zone per string:
//! `name|abbrs|offsets|indices|untils|population`. Offsets and untils are
//! base-60 numbers (digits `0-9a-zA-X`); untils are deltas in minutes from
//! the previous transition, the first one absolute from the epoch. Each
//! character of `indices` selects the abbreviation and offset in force
//! until the matching until. The final period runs forever and has no
//! until.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

const BASE60: &[u8; 60] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWX";

/// Suffix identifying the packed data file in the timezone package
pub const PACKED_DATA_SUFFIX: &str = "moment-timezone/data/packed/latest.json";

/// First year kept when trimming
pub const FIRST_YEAR: i32 = 2017;

/// Years kept past the current year
pub const YEARS_AHEAD: i32 = 5;

fn digit(c: u8) -> Option<u32> {
    BASE60.iter().position(|&d| d == c).map(|p| p as u32)
}

/// Decode a base-60 number, with optional sign and fraction
pub fn unpack_base60(s: &str) -> Option<f64> {
    let (negative, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let (whole, fraction) = s.split_once('.').unwrap_or((s, ""));

    let mut out = 0.0f64;
    for c in whole.bytes() {
        out = out * 60.0 + f64::from(digit(c)?);
    }
    let mut scale = 1.0f64;
    for c in fraction.bytes() {
        scale /= 60.0;
        out += f64::from(digit(c)?) * scale;
    }
    Some(if negative { -out } else { out })
}

/// Encode a number in base 60 with up to three fractional digits
pub fn pack_base60(value: f64) -> String {
    let negative = value < 0.0;
    let mut value = value.abs();
    let mut whole = value.trunc() as u64;
    value -= value.trunc();

    let mut digits = Vec::new();
    loop {
        digits.push(BASE60[(whole % 60) as usize]);
        whole /= 60;
        if whole == 0 {
            break;
        }
    }
    if negative {
        digits.push(b'-');
    }
    digits.reverse();

    let mut fraction = Vec::new();
    for _ in 0..3 {
        if value < 1e-9 {
            break;
        }
        value *= 60.0;
        let d = value.trunc();
        fraction.push(BASE60[d as usize % 60]);
        value -= d;
    }
    if !fraction.is_empty() {
        digits.push(b'.');
        digits.extend(fraction);
    }

    String::from_utf8_lossy(&digits).into_owned()
}

/// One period in a zone's history
#[derive(Debug, Clone, PartialEq)]
struct Period {
    abbr: String,
    /// Offset as written in the packed data
    offset: String,
    /// End of this period in minutes since the epoch; `None` = forever
    until: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
struct PackedZone {
    name: String,
    periods: Vec<Period>,
    population: Option<String>,
}

fn unpack_zone(packed: &str) -> Option<PackedZone> {
    let fields: Vec<&str> = packed.split('|').collect();
    if fields.len() < 5 {
        return None;
    }
    let abbrs: Vec<&str> = fields[1].split(' ').collect();
    let offsets: Vec<&str> = fields[2].split(' ').collect();
    let indices: Vec<usize> = fields[3]
        .bytes()
        .map(|c| digit(c).map(|d| d as usize))
        .collect::<Option<_>>()?;
    let deltas: Vec<f64> = if fields[4].is_empty() {
        Vec::new()
    } else {
        fields[4].split(' ').map(unpack_base60).collect::<Option<_>>()?
    };

    let mut periods = Vec::with_capacity(indices.len());
    let mut until = 0.0;
    for (i, &idx) in indices.iter().enumerate() {
        let end = if i + 1 < indices.len() {
            until += deltas.get(i).copied()?;
            Some(until)
        } else {
            None
        };
        periods.push(Period {
            abbr: (*abbrs.get(idx)?).to_string(),
            offset: (*offsets.get(idx)?).to_string(),
            until: end,
        });
    }

    Some(PackedZone {
        name: fields[0].to_string(),
        periods,
        population: fields.get(5).map(|p| p.to_string()),
    })
}

fn pack_zone(zone: &PackedZone) -> String {
    let mut keys: Vec<(&str, &str)> = Vec::new();
    let mut indices = String::new();
    for period in &zone.periods {
        let key = (period.abbr.as_str(), period.offset.as_str());
        let idx = match keys.iter().position(|k| *k == key) {
            Some(idx) => idx,
            None => {
                keys.push(key);
                keys.len() - 1
            }
        };
        indices.push(BASE60[idx % 60] as char);
    }

    let mut previous = 0.0;
    let untils: Vec<String> = zone
        .periods
        .iter()
        .filter_map(|p| p.until)
        .map(|until| {
            let delta = until - previous;
            previous = until;
            pack_base60(delta)
        })
        .collect();

    let abbrs: Vec<&str> = keys.iter().map(|k| k.0).collect();
    let offsets: Vec<&str> = keys.iter().map(|k| k.1).collect();
    let mut fields = vec![
        zone.name.clone(),
        abbrs.join(" "),
        offsets.join(" "),
        indices,
        untils.join(" "),
    ];
    if let Some(population) = &zone.population {
        fields.push(population.clone());
    }
    fields.join("|")
}

/// Minutes since the epoch at the start of `year` (UTC)
fn year_start_minutes(year: i32) -> f64 {
    days_from_civil(year, 1, 1) as f64 * 24.0 * 60.0
}

/// Keep only the periods overlapping `[start_year, end_year]`
fn trim_zone(zone: &mut PackedZone, start_year: i32, end_year: i32) {
    let start = year_start_minutes(start_year);
    let end = year_start_minutes(end_year + 1);

    let mut kept: Vec<Period> = Vec::new();
    for period in &zone.periods {
        if period.until.is_some_and(|until| until <= start) {
            continue;
        }
        let mut period = period.clone();
        let past_range = period.until.map_or(true, |until| until >= end);
        if past_range {
            period.until = None;
        }
        kept.push(period);
        if past_range {
            break;
        }
    }

    if kept.is_empty() {
        if let Some(last) = zone.periods.last() {
            kept.push(Period {
                until: None,
                ..last.clone()
            });
        }
    }
    zone.periods = kept;
}

/// Trim packed timezone data in place, keeping transitions between
/// `start_year` and `end_year` inclusive. Links and other fields are left
/// untouched.
pub fn trim_packed_data(data: &[u8], start_year: i32, end_year: i32) -> Result<Vec<u8>, String> {
    let mut json: Value = serde_json::from_slice(data).map_err(|e| format!("invalid timezone data: {e}"))?;
    let zones = json
        .get_mut("zones")
        .and_then(Value::as_array_mut)
        .ok_or("timezone data has no zones array")?;

    for zone in zones.iter_mut() {
        let Some(packed) = zone.as_str() else {
            return Err("zone entry is not a string".to_string());
        };
        let mut unpacked = unpack_zone(packed).ok_or_else(|| format!("malformed zone entry: {packed}"))?;
        trim_zone(&mut unpacked, start_year, end_year);
        *zone = Value::String(pack_zone(&unpacked));
    }

    serde_json::to_vec(&json).map_err(|e| e.to_string())
}

/// Days since 1970-01-01 for a proleptic Gregorian date
pub fn days_from_civil(year: i32, month: u32, day: u32) -> i64 {
    let y = i64::from(year) - i64::from(month <= 2);
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let m = i64::from(month);
    let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Gregorian year containing `days` since 1970-01-01
pub fn year_from_days(days: i64) -> i32 {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);
    year as i32
}

/// Current UTC year from the system clock
pub fn current_year() -> i32 {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    year_from_days((secs / 86_400) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minutes(year: i32) -> f64 {
        year_start_minutes(year)
    }

    #[test]
    fn test_base60_roundtrip_values() {
        assert_eq!(unpack_base60("0"), Some(0.0));
        assert_eq!(unpack_base60("X"), Some(59.0));
        assert_eq!(unpack_base60("10"), Some(60.0));
        assert_eq!(unpack_base60("-1.u"), Some(-1.5));
        assert_eq!(pack_base60(60.0), "10");
        assert_eq!(pack_base60(-1.5), "-1.u");
        assert_eq!(unpack_base60("1?"), None);
    }

    #[test]
    fn test_base60_digit_boundaries() {
        assert_eq!(unpack_base60("y"), Some(34.0));
        assert_eq!(unpack_base60("z"), Some(35.0));
        assert_eq!(unpack_base60("A"), Some(36.0));
        assert_eq!(unpack_base60("X"), Some(59.0));
        assert_eq!(unpack_base60("1fz0"), Some(272_100.0));
        assert_eq!(pack_base60(35.0), "z");
        assert_eq!(pack_base60(36.0), "A");
    }

    #[test]
    fn test_trim_real_zone_entry() {
        let data = serde_json::json!({
            "zones": ["America/New_York|EST EDT|50 40|0101010|-261t0 1nX0 11B0 1Vz0 1fz0 1a10|21e6"],
            "links": [],
        });
        let trimmed = trim_packed_data(&serde_json::to_vec(&data).unwrap(), 2017, 2030).unwrap();
        let json: Value = serde_json::from_slice(&trimmed).unwrap();

        let zone = unpack_zone(json["zones"][0].as_str().unwrap()).unwrap();
        assert_eq!(zone.name, "America/New_York");
        assert_eq!(zone.periods.len(), 1);
        assert_eq!(zone.periods[0].abbr, "EST");
        assert_eq!(zone.population.as_deref(), Some("21e6"));
    }

    #[test]
    fn test_civil_day_conversions() {
        assert_eq!(days_from_civil(1970, 1, 1), 0);
        assert_eq!(days_from_civil(2000, 3, 1), 11_017);
        assert_eq!(year_from_days(0), 1970);
        assert_eq!(year_from_days(days_from_civil(2024, 12, 31)), 2024);
        assert_eq!(year_from_days(days_from_civil(2025, 1, 1)), 2025);
    }

    #[test]
    fn test_current_year_is_plausible() {
        assert!(current_year() >= 2024);
    }

    fn zone_with_transitions(years: &[i32]) -> String {
        let mut previous = 0.0;
        let deltas: Vec<String> = years
            .iter()
            .map(|&y| {
                let m = minutes(y);
                let delta = m - previous;
                previous = m;
                pack_base60(delta)
            })
            .collect();
        let indices: String = (0..=years.len()).map(|i| if i % 2 == 0 { '0' } else { '1' }).collect();
        format!("Test/Zone|STD DST|0 -10|{indices}|{}|12e5", deltas.join(" "))
    }

    #[test]
    fn test_unpack_pack_preserves_zone() {
        let packed = zone_with_transitions(&[2000, 2010, 2020]);
        let zone = unpack_zone(&packed).unwrap();
        assert_eq!(zone.periods.len(), 4);
        assert_eq!(zone.periods[3].until, None);
        assert_eq!(pack_zone(&zone), packed);
    }

    #[test]
    fn test_trim_drops_old_and_far_future_transitions() {
        let packed = zone_with_transitions(&[2000, 2010, 2018, 2020, 2040, 2050]);
        let mut zone = unpack_zone(&packed).unwrap();
        trim_zone(&mut zone, 2017, 2030);

        // The period ending 2018 (started 2010) is the first one kept
        let untils: Vec<Option<f64>> = zone.periods.iter().map(|p| p.until).collect();
        assert_eq!(untils, vec![Some(minutes(2018)), Some(minutes(2020)), None]);
        assert_eq!(zone.periods[0].abbr, "STD");
    }

    #[test]
    fn test_trim_zone_without_transitions() {
        let mut zone = unpack_zone("Etc/UTC|UTC|0|0||").unwrap();
        trim_zone(&mut zone, 2017, 2030);
        assert_eq!(pack_zone(&zone), "Etc/UTC|UTC|0|0||");
    }

    #[test]
    fn test_trim_packed_data_keeps_links() {
        let data = serde_json::json!({
            "version": "2024a",
            "zones": [zone_with_transitions(&[2000, 2018, 2050])],
            "links": ["Test/Zone|Test/Alias"],
        });
        let trimmed = trim_packed_data(&serde_json::to_vec(&data).unwrap(), 2017, 2030).unwrap();
        let json: Value = serde_json::from_slice(&trimmed).unwrap();

        assert_eq!(json["version"], "2024a");
        assert_eq!(json["links"][0], "Test/Zone|Test/Alias");
        let zone = unpack_zone(json["zones"][0].as_str().unwrap()).unwrap();
        assert_eq!(zone.periods.len(), 2);
    }

    #[test]
    fn test_trim_packed_data_rejects_garbage() {
        assert!(trim_packed_data(b"{\"zones\": 3}", 2017, 2030).is_err());
        assert!(trim_packed_data(b"not json", 2017, 2030).is_err());
    }
}
