//! Form field validation and masking for Brazilian documents and contacts.
//!
//! CPF: 11 digits with two mod-11 check digits. CNPJ: 14 digits with two
//! weighted mod-11 check digits. Sequences of one repeated digit are invalid
//! for both even though they satisfy the arithmetic.

use std::sync::LazyLock;

use regex::Regex;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

static PLAN_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]{2,63}$").unwrap());

static HEX_COLOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#(?:[0-9a-fA-F]{3}|[0-9a-fA-F]{6})$").unwrap());

/// Keep ASCII digits only.
pub fn only_digits(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn digits_of(value: &str) -> Vec<u32> {
    value.chars().filter_map(|c| c.to_digit(10)).collect()
}

fn all_same(digits: &[u32]) -> bool {
    digits.windows(2).all(|w| w[0] == w[1])
}

pub fn is_valid_cpf(value: &str) -> bool {
    let d = digits_of(value);
    if d.len() != 11 || all_same(&d) {
        return false;
    }
    let check = |len: usize| -> u32 {
        let sum: u32 = (0..len).map(|i| d[i] * (len as u32 + 1 - i as u32)).sum();
        let rev = 11 - (sum % 11);
        if rev >= 10 {
            0
        } else {
            rev
        }
    };
    check(9) == d[9] && check(10) == d[10]
}

pub fn is_valid_cnpj(value: &str) -> bool {
    let d = digits_of(value);
    if d.len() != 14 || all_same(&d) {
        return false;
    }
    let check = |len: usize| -> u32 {
        let mut pos = len as u32 - 7;
        let mut sum = 0;
        for digit in &d[..len] {
            sum += digit * pos;
            pos -= 1;
            if pos < 2 {
                pos = 9;
            }
        }
        if sum % 11 < 2 {
            0
        } else {
            11 - sum % 11
        }
    };
    check(12) == d[12] && check(13) == d[13]
}

/// CPF when up to 11 digits, CNPJ otherwise.
pub fn is_valid_cpf_cnpj(value: &str) -> bool {
    if only_digits(value).len() <= 11 {
        is_valid_cpf(value)
    } else {
        is_valid_cnpj(value)
    }
}

/// Mask as `000.000.000-00` or `00.000.000/0000-00`, tolerating partial input.
pub fn format_cpf_cnpj(value: &str) -> String {
    let d = only_digits(value);
    let groups: &[(usize, &str)] = if d.len() <= 11 {
        &[(3, ""), (3, "."), (3, "."), (2, "-")]
    } else {
        &[(2, ""), (3, "."), (3, "."), (4, "/"), (2, "-")]
    };
    mask(&d, groups)
}

/// Mask as `(00) 0000-0000` or `(00) 00000-0000`.
pub fn format_phone(value: &str) -> String {
    let mut d = only_digits(value);
    d.truncate(11);
    if d.len() <= 2 {
        return d;
    }
    let (area, rest) = d.split_at(2);
    let split = if rest.len() > 8 { 5 } else { 4 };
    if rest.len() <= split {
        format!("({area}) {rest}")
    } else {
        format!("({area}) {}-{}", &rest[..split], &rest[split..])
    }
}

fn mask(digits: &str, groups: &[(usize, &str)]) -> String {
    let mut out = String::new();
    let mut rest = digits;
    for (len, sep) in groups {
        if rest.is_empty() {
            break;
        }
        let take = (*len).min(rest.len());
        if !out.is_empty() {
            out.push_str(sep);
        }
        out.push_str(&rest[..take]);
        rest = &rest[take..];
    }
    out
}

pub fn is_valid_email(value: &str) -> bool {
    EMAIL.is_match(value.trim())
}

/// Brazilian postal code: exactly 8 digits once the mask is removed.
pub fn is_valid_cep(value: &str) -> bool {
    only_digits(value).len() == 8
}

pub fn is_valid_plan_code(value: &str) -> bool {
    PLAN_CODE.is_match(value)
}

pub fn is_valid_hex_color(value: &str) -> bool {
    HEX_COLOR.is_match(value)
}

/// Lowercase ASCII slug: accents folded, runs of other characters become `-`.
pub fn slugify(value: &str) -> String {
    let mut out = String::new();
    for c in value.trim().chars().map(fold_accent) {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out.truncate(64);
    out
}

fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' | 'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'a',
        'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' | 'Ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' | 'Í' | 'Ì' | 'Î' | 'Ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' | 'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' | 'Ú' | 'Ù' | 'Û' | 'Ü' => 'u',
        'ç' | 'Ç' => 'c',
        other => other,
    }
}
