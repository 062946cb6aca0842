//! Error handling foundation shared by the engine crates.
//!
//! Only the `Result` alias lives here. Every crate owns its error enums
//! (credential, provider, schedule, dispatch...) and wraps them in a
//! rootcause [`Report`] when they cross a layer boundary. The caller maps
//! the report's current context into its own enum.

use rootcause::Report;

/// Result alias over a rootcause report carrying context `C`.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_accepts_unit_context() {
        let ok: Result<&str> = Ok("scheduled");
        assert_eq!(ok.expect("should be ok"), "scheduled");
    }
}
