pub mod logging;

/// `Some(true)` for any non-empty value other than `0`; `None` when unset.
pub(crate) fn env_truthy(var: &str) -> Option<bool> {
    std::env::var(var).ok().map(|value| truthy(&value))
}

fn truthy(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && value != "0" && !value.eq_ignore_ascii_case("false")
}
