//! String-to-value converters for literal property assignments.
//!
//! The accepted formats match the host framework's string converters:
//! `#rrggbb`/`#aarrggbb` or named colors, ISO dates and times, `x,y` points,
//! `WxH` sizes, `x,y,WxH` rects and comma-separated vectors.

/// A color as AARRGGBB.
pub fn color_from_string(s: &str) -> Option<u32> {
    if let Some(hex) = s.strip_prefix('#') {
        let parse = |h: &str| u32::from_str_radix(h, 16).ok();
        return match hex.len() {
            6 => parse(hex).map(|rgb| 0xFF00_0000 | rgb),
            8 => parse(hex),
            _ => None,
        };
    }
    // The named colors the framework guarantees.
    let named: &[(&str, u32)] = &[
        ("black", 0xFF000000),
        ("white", 0xFFFFFFFF),
        ("red", 0xFFFF0000),
        ("green", 0xFF008000),
        ("blue", 0xFF0000FF),
        ("yellow", 0xFFFFFF00),
        ("cyan", 0xFF00FFFF),
        ("magenta", 0xFFFF00FF),
        ("gray", 0xFF808080),
        ("darkgray", 0xFFA9A9A9),
        ("lightgray", 0xFFD3D3D3),
        ("transparent", 0x00000000),
        ("orange", 0xFFFFA500),
        ("purple", 0xFF800080),
        ("brown", 0xFFA52A2A),
        ("pink", 0xFFFFC0CB),
    ];
    named
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(s))
        .map(|(_, argb)| *argb)
}

/// `yyyy-MM-dd` to a julian day number.
pub fn date_from_string(s: &str) -> Option<i64> {
    let mut parts = s.splitn(3, '-');
    let year: i64 = parts.next()?.parse().ok()?;
    let month: i64 = parts.next()?.parse().ok()?;
    let day: i64 = parts.next()?.parse().ok()?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    Some(julian_day(year, month, day))
}

/// Gregorian date to julian day (valid for all years after -4713).
fn julian_day(year: i64, month: i64, day: i64) -> i64 {
    let a = (14 - month) / 12;
    let y = year + 4800 - a;
    let m = month + 12 * a - 3;
    day + (153 * m + 2) / 5 + 365 * y + y / 4 - y / 100 + y / 400 - 32045
}

/// `hh:mm[:ss[.zzz]]` to milliseconds since midnight.
pub fn time_from_string(s: &str) -> Option<u32> {
    let mut parts = s.splitn(3, ':');
    let hours: u32 = parts.next()?.parse().ok()?;
    let minutes: u32 = parts.next()?.parse().ok()?;
    let (seconds, millis) = match parts.next() {
        Some(rest) => {
            let mut sp = rest.splitn(2, '.');
            let secs: u32 = sp.next()?.parse().ok()?;
            let ms = match sp.next() {
                Some(frac) => {
                    let frac: u32 = frac.parse().ok()?;
                    match rest.split('.').nth(1).map(str::len) {
                        Some(1) => frac * 100,
                        Some(2) => frac * 10,
                        _ => frac,
                    }
                }
                None => 0,
            };
            (secs, ms)
        }
        None => (0, 0),
    };
    if hours >= 24 || minutes >= 60 || seconds >= 60 || millis >= 1000 {
        return None;
    }
    Some(((hours * 60 + minutes) * 60 + seconds) * 1000 + millis)
}

/// `yyyy-MM-ddThh:mm...` or `yyyy-MM-dd hh:mm...`.
pub fn date_time_from_string(s: &str) -> Option<(i64, u32)> {
    let split_at = s.find(['T', ' '])?;
    let date = date_from_string(&s[..split_at])?;
    let time = time_from_string(&s[split_at + 1..])?;
    Some((date, time))
}

/// `x,y`.
pub fn point_from_string(s: &str) -> Option<(f64, f64)> {
    let mut parts = s.splitn(2, ',');
    let x: f64 = parts.next()?.trim().parse().ok()?;
    let y: f64 = parts.next()?.trim().parse().ok()?;
    Some((x, y))
}

/// `WxH`.
pub fn size_from_string(s: &str) -> Option<(f64, f64)> {
    let mut parts = s.splitn(2, 'x');
    let w: f64 = parts.next()?.trim().parse().ok()?;
    let h: f64 = parts.next()?.trim().parse().ok()?;
    Some((w, h))
}

/// `x,y,WxH`.
pub fn rect_from_string(s: &str) -> Option<(f64, f64, f64, f64)> {
    let mut parts = s.splitn(3, ',');
    let x: f64 = parts.next()?.trim().parse().ok()?;
    let y: f64 = parts.next()?.trim().parse().ok()?;
    let (w, h) = size_from_string(parts.next()?)?;
    Some((x, y, w, h))
}

/// `x,y,z`.
pub fn vector3d_from_string(s: &str) -> Option<(f32, f32, f32)> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 3 {
        return None;
    }
    Some((
        parts[0].trim().parse().ok()?,
        parts[1].trim().parse().ok()?,
        parts[2].trim().parse().ok()?,
    ))
}

/// `x,y,z,w`.
pub fn vector4d_from_string(s: &str) -> Option<(f32, f32, f32, f32)> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 4 {
        return None;
    }
    Some((
        parts[0].trim().parse().ok()?,
        parts[1].trim().parse().ok()?,
        parts[2].trim().parse().ok()?,
        parts[3].trim().parse().ok()?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colors() {
        assert_eq!(color_from_string("#ff0000"), Some(0xFFFF0000));
        assert_eq!(color_from_string("#80ff0000"), Some(0x80FF0000));
        assert_eq!(color_from_string("red"), Some(0xFFFF0000));
        assert_eq!(color_from_string("Transparent"), Some(0x00000000));
        assert_eq!(color_from_string("#ff00"), None);
        assert_eq!(color_from_string("no-such-color"), None);
    }

    #[test]
    fn dates_and_times() {
        // 2000-01-01 is JD 2451545.
        assert_eq!(date_from_string("2000-01-01"), Some(2_451_545));
        assert_eq!(date_from_string("2000-13-01"), None);
        assert_eq!(time_from_string("00:00"), Some(0));
        assert_eq!(time_from_string("01:02:03"), Some(3_723_000));
        assert_eq!(time_from_string("25:00"), None);
        assert_eq!(
            date_time_from_string("2000-01-01T12:00"),
            Some((2_451_545, 43_200_000))
        );
    }

    #[test]
    fn geometry() {
        assert_eq!(point_from_string("3,4"), Some((3.0, 4.0)));
        assert_eq!(size_from_string("120x80"), Some((120.0, 80.0)));
        assert_eq!(rect_from_string("1,2,30x40"), Some((1.0, 2.0, 30.0, 40.0)));
        assert_eq!(vector3d_from_string("1,2,3"), Some((1.0, 2.0, 3.0)));
        assert_eq!(vector4d_from_string("1,2,3,4"), Some((1.0, 2.0, 3.0, 4.0)));
        assert_eq!(point_from_string("3"), None);
    }
}
