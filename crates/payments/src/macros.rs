/// Text mapping for the ledger's closed vocabularies (statuses, methods,
/// categories). The text form is what is stored in the database and matches
/// the `SCREAMING_SNAKE_CASE` serde representation.
macro_rules! impl_text_enum {
    ($t:ident, $name:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $t {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($t::$variant => $text),+
                }
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl core::str::FromStr for $t {
            type Err = paybook_core::DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_uppercase().as_str() {
                    $($text => Ok($t::$variant),)+
                    other => Err(paybook_core::DomainError::validation(format!(
                        "unknown {}: '{}'",
                        $name, other
                    ))),
                }
            }
        }
    };
}
