//! Currency symbols, locales and amount formatting.
//!
//! Amounts are never converted between currencies; these helpers only decide
//! how one amount in one currency is shown.

/// Display rules for one currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrencyInfo {
    pub code: &'static str,
    pub symbol: &'static str,
    pub locale: &'static str,
    pub decimals: usize,
    /// Symbol written after the number ("12,50 €") instead of before it.
    pub symbol_after: bool,
    pub group_sep: char,
    pub decimal_sep: char,
}

const fn info(
    code: &'static str,
    symbol: &'static str,
    locale: &'static str,
    decimals: usize,
    symbol_after: bool,
    group_sep: char,
    decimal_sep: char,
) -> CurrencyInfo {
    CurrencyInfo {
        code,
        symbol,
        locale,
        decimals,
        symbol_after,
        group_sep,
        decimal_sep,
    }
}

/// Currencies offered in the expense form.
pub const SUPPORTED: &[CurrencyInfo] = &[
    info("USD", "$", "en-US", 2, false, ',', '.'),
    info("EUR", "€", "de-DE", 2, true, '.', ','),
    info("GBP", "£", "en-GB", 2, false, ',', '.'),
    info("JPY", "¥", "ja-JP", 0, false, ',', '.'),
    info("INR", "₹", "en-IN", 2, false, ',', '.'),
    info("CAD", "CA$", "en-CA", 2, false, ',', '.'),
    info("AUD", "A$", "en-AU", 2, false, ',', '.'),
    info("CHF", "CHF", "de-CH", 2, false, '\'', '.'),
    info("CNY", "¥", "zh-CN", 2, false, ',', '.'),
    info("BRL", "R$", "pt-BR", 2, false, '.', ','),
    info("MXN", "MX$", "es-MX", 2, false, ',', '.'),
    info("PLN", "zł", "pl-PL", 2, true, ' ', ','),
    info("SEK", "kr", "sv-SE", 2, true, ' ', ','),
];

pub const DEFAULT_CURRENCY: &str = "USD";

pub fn lookup(code: &str) -> Option<&'static CurrencyInfo> {
    SUPPORTED.iter().find(|c| c.code.eq_ignore_ascii_case(code))
}

/// Symbol for `code`, or the code itself when unknown.
pub fn symbol(code: &str) -> String {
    lookup(code)
        .map(|c| c.symbol.to_string())
        .unwrap_or_else(|| code.to_uppercase())
}

/// Locale tag used to format `code`, `en-US` when unknown.
pub fn locale(code: &str) -> &'static str {
    lookup(code).map(|c| c.locale).unwrap_or("en-US")
}

pub fn decimals(code: &str) -> usize {
    lookup(code).map(|c| c.decimals).unwrap_or(2)
}

/// Format `amount` with the currency's symbol and separators,
/// e.g. `$1,234.56`, `1.234,56 €`, `¥1,235`.
///
/// Unknown codes are formatted US-style with the code as prefix (`XYZ 12.00`).
pub fn format_amount(amount: f64, code: &str) -> String {
    let (symbol, after, decimals, group, point) = match lookup(code) {
        Some(c) => (c.symbol.to_string(), c.symbol_after, c.decimals, c.group_sep, c.decimal_sep),
        None => (format!("{} ", code.to_uppercase()), false, 2, ',', '.'),
    };

    let number = group_digits(amount.abs(), decimals, group, point);
    let sign = if amount < 0.0 && number.chars().any(|c| c.is_ascii_digit() && c != '0') {
        "-"
    } else {
        ""
    };

    if after {
        format!("{}{} {}", sign, number, symbol)
    } else {
        format!("{}{}{}", sign, symbol, number)
    }
}

/// Signed amount for balances: a leading `+` for positive values.
pub fn format_signed(amount: f64, code: &str) -> String {
    let formatted = format_amount(amount, code);
    if amount > 0.0 && !formatted.starts_with('-') {
        format!("+{}", formatted)
    } else {
        formatted
    }
}

fn group_digits(value: f64, decimals: usize, group: char, point: char) -> String {
    let fixed = format!("{:.*}", decimals, value);
    let (int_part, frac_part) = match fixed.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (fixed.as_str(), None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(group);
        }
        grouped.push(ch);
    }

    match frac_part {
        Some(frac) => format!("{}{}{}", grouped, point, frac),
        None => grouped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_and_locale() {
        assert_eq!(symbol("USD"), "$");
        assert_eq!(symbol("eur"), "€");
        assert_eq!(symbol("xyz"), "XYZ");
        assert_eq!(locale("BRL"), "pt-BR");
        assert_eq!(locale("XYZ"), "en-US");
        assert_eq!(decimals("JPY"), 0);
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(1234.5, "USD"), "$1,234.50");
        assert_eq!(format_amount(1234.5, "EUR"), "1.234,50 €");
        assert_eq!(format_amount(1234.6, "JPY"), "¥1,235");
        assert_eq!(format_amount(0.0, "GBP"), "£0.00");
        assert_eq!(format_amount(1234567.891, "SEK"), "1 234 567,89 kr");
        assert_eq!(format_amount(12.0, "XYZ"), "XYZ 12.00");
    }

    #[test]
    fn test_format_negative_and_signed() {
        assert_eq!(format_amount(-50.0, "USD"), "-$50.00");
        assert_eq!(format_amount(-0.001, "USD"), "$0.00");
        assert_eq!(format_signed(50.0, "USD"), "+$50.00");
        assert_eq!(format_signed(-50.0, "EUR"), "-50,00 €");
        assert_eq!(format_signed(0.0, "USD"), "$0.00");
    }
}
