//! Rupee amounts spelled out in the Indian numbering system (lakh, crore),
//! as printed on challans.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use paybook_core::money::round_money;

const ONES: [&str; 20] = [
    "Zero", "One", "Two", "Three", "Four", "Five", "Six", "Seven", "Eight", "Nine", "Ten",
    "Eleven", "Twelve", "Thirteen", "Fourteen", "Fifteen", "Sixteen", "Seventeen", "Eighteen",
    "Nineteen",
];

const TENS: [&str; 10] = [
    "", "", "Twenty", "Thirty", "Forty", "Fifty", "Sixty", "Seventy", "Eighty", "Ninety",
];

fn below_hundred(n: u64, out: &mut Vec<&'static str>) {
    match n {
        0 => {}
        1..=19 => out.push(ONES[n as usize]),
        _ => {
            out.push(TENS[(n / 10) as usize]);
            if n % 10 != 0 {
                out.push(ONES[(n % 10) as usize]);
            }
        }
    }
}

fn spell(n: u64, out: &mut Vec<&'static str>) {
    let crore = n / 10_000_000;
    let rest = n % 10_000_000;
    if crore > 0 {
        spell(crore, out);
        out.push("Crore");
    }
    let lakh = rest / 100_000;
    let thousand = (rest / 1_000) % 100;
    let hundred = (rest / 100) % 10;
    let units = rest % 100;

    if lakh > 0 {
        below_hundred(lakh, out);
        out.push("Lakh");
    }
    if thousand > 0 {
        below_hundred(thousand, out);
        out.push("Thousand");
    }
    if hundred > 0 {
        out.push(ONES[hundred as usize]);
        out.push("Hundred");
    }
    below_hundred(units, out);
}

/// e.g. `Rupees Five Lakh Only`, `Rupees Twelve and Fifty Paise Only`.
pub fn amount_in_words(amount: Decimal) -> String {
    let amount = round_money(amount);
    let negative = amount.is_sign_negative() && !amount.is_zero();
    let amount = amount.abs();
    let rupees = amount.trunc().to_u64().unwrap_or(0);
    let paise = ((amount - amount.trunc()) * Decimal::ONE_HUNDRED)
        .to_u64()
        .unwrap_or(0);

    let mut words = Vec::new();
    if negative {
        words.push("Minus");
    }
    words.push("Rupees");
    if rupees == 0 {
        words.push(ONES[0]);
    } else {
        spell(rupees, &mut words);
    }
    if paise > 0 {
        words.push("and");
        below_hundred(paise, &mut words);
        words.push("Paise");
    }
    words.push("Only");
    words.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn words(s: &str) -> String {
        amount_in_words(Decimal::from_str(s).unwrap())
    }

    #[test]
    fn spells_lakhs_and_crores() {
        assert_eq!(words("500000.00"), "Rupees Five Lakh Only");
        assert_eq!(words("10000000"), "Rupees One Crore Only");
        assert_eq!(
            words("12345678.90"),
            "Rupees One Crore Twenty Three Lakh Forty Five Thousand Six Hundred Seventy Eight and Ninety Paise Only"
        );
    }

    #[test]
    fn spells_small_amounts_and_paise() {
        assert_eq!(words("0"), "Rupees Zero Only");
        assert_eq!(words("12.50"), "Rupees Twelve and Fifty Paise Only");
        assert_eq!(words("0.05"), "Rupees Zero and Five Paise Only");
        assert_eq!(words("110"), "Rupees One Hundred Ten Only");
    }

    #[test]
    fn large_crore_counts_recurse() {
        assert_eq!(words("1500000000"), "Rupees One Hundred Fifty Crore Only");
    }
}
