//! Login challenge solver.
//!
//! The login form carries a `capt` input inside a `div.wrap-input100` whose
//! text reads like `What is 7 + 5 = ?`. The answer is submitted as a decimal
//! string alongside the credentials.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;

static CAPT_INPUT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"input[name="capt"]"#).unwrap());

static CHALLENGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)What is\s+(\d+)\s*([+\-*/])\s*(\d+)\s*=\s*\?").unwrap()
});

const WRAPPER_CLASS: &str = "wrap-input100";

/// Find and evaluate the arithmetic challenge in a login page.
///
/// Returns `None` when the input, its wrapper, or the expression is missing,
/// and when the expression cannot be evaluated (division by zero, overflow).
pub fn solve(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let input = document.select(&CAPT_INPUT).next()?;

    let wrapper = input
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "div" && el.value().classes().any(|c| c == WRAPPER_CLASS))?;

    let text = wrapper
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    evaluate(&text).map(|answer| answer.to_string())
}

/// Evaluate the first `What is <a> <op> <b> = ?` expression found in `text`.
pub fn evaluate(text: &str) -> Option<i64> {
    let caps = CHALLENGE.captures(text)?;
    let lhs: i64 = caps[1].parse().ok()?;
    let rhs: i64 = caps[3].parse().ok()?;
    match &caps[2] {
        "+" => lhs.checked_add(rhs),
        "-" => lhs.checked_sub(rhs),
        "*" => lhs.checked_mul(rhs),
        "/" => floor_div(lhs, rhs),
        _ => None,
    }
}

fn floor_div(lhs: i64, rhs: i64) -> Option<i64> {
    if rhs == 0 {
        return None;
    }
    let q = lhs.checked_div(rhs)?;
    if (lhs % rhs != 0) && ((lhs < 0) != (rhs < 0)) {
        Some(q - 1)
    } else {
        Some(q)
    }
}
