const MONTH_NAMES: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

/// Month number for an English month name or an abbreviation of at least three letters.
pub fn month_from_name(name: &str) -> Option<u32> {
    let lower = name.trim().to_ascii_lowercase();
    if lower.len() < 3 {
        return None;
    }
    MONTH_NAMES
        .iter()
        .position(|full| full.starts_with(&lower))
        .map(|idx| idx as u32 + 1)
}

/// "$1,234.50" / "-$1,234.50"
pub fn format_usd(value: f64) -> String {
    format!("{}${}", sign_prefix(value, 2, false), group_thousands(value.abs(), 2))
}

/// "+$1,234.50" / "-$1,234.50"
pub fn format_signed_usd(value: f64) -> String {
    format!("{}${}", sign_prefix(value, 2, true), group_thousands(value.abs(), 2))
}

/// "20.0%"
pub fn format_percent(value: f64, decimals: usize) -> String {
    format!("{}{:.*}%", sign_prefix(value, decimals, false), decimals, value.abs())
}

/// "+20.0%"
pub fn format_signed_percent(value: f64, decimals: usize) -> String {
    format!("{}{:.*}%", sign_prefix(value, decimals, true), decimals, value.abs())
}

/// Sign shown in front of a rounded magnitude; a value rounding to zero never gets "-".
fn sign_prefix(value: f64, decimals: usize, explicit_plus: bool) -> &'static str {
    let rounds_to_zero = (value.abs() * 10f64.powi(decimals as i32)).round() == 0.0;
    if value < 0.0 && !rounds_to_zero {
        "-"
    } else if explicit_plus {
        "+"
    } else {
        ""
    }
}

fn group_thousands(value: f64, decimals: usize) -> String {
    let text = format!("{:.*}", decimals, value);
    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (text.as_str(), None),
    };

    let mut grouped = String::with_capacity(text.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    if let Some(frac) = frac_part {
        grouped.push('.');
        grouped.push_str(frac);
    }
    grouped
}
