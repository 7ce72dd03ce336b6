/// Kenyan MSISDN handling. Riders type numbers every way imaginable
/// (`0712 345 678`, `+254712345678`, `254712345678`); providers each want
/// their own canonical form, so everything normalizes through here first.

#[derive(Debug, thiserror::Error)]
pub enum PhoneError {
    #[error("Invalid phone number: {0}")]
    Invalid(String),
}

/// A validated mobile number in canonical international form (2547XXXXXXXX
/// or 2541XXXXXXXX, digits only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Msisdn(String);

impl Msisdn {
    pub fn parse(input: &str) -> Result<Self, PhoneError> {
        let cleaned: String = input
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-' && *c != '+')
            .collect();

        if !cleaned.chars().all(|c| c.is_ascii_digit()) {
            return Err(PhoneError::Invalid("contains non-digit characters".to_string()));
        }

        let canonical = if cleaned.len() == 10 && (cleaned.starts_with("07") || cleaned.starts_with("01")) {
            format!("254{}", &cleaned[1..])
        } else if cleaned.len() == 12 && (cleaned.starts_with("2547") || cleaned.starts_with("2541")) {
            cleaned
        } else {
            return Err(PhoneError::Invalid(format!(
                "expected a Kenyan mobile number, got {} digits",
                cleaned.len()
            )));
        };

        Ok(Msisdn(canonical))
    }

    /// `254XXXXXXXXX`, the form Daraja wants.
    pub fn international(&self) -> &str {
        &self.0
    }

    /// The nine subscriber digits with no country code, the form Airtel
    /// wants.
    pub fn local(&self) -> &str {
        &self.0[3..]
    }
}

impl std::fmt::Display for Msisdn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_common_forms() {
        for input in [
            "0712345678",
            "0712 345 678",
            "+254712345678",
            "254712345678",
            "254-712-345-678",
        ] {
            let msisdn = Msisdn::parse(input).unwrap();
            assert_eq!(msisdn.international(), "254712345678", "input: {}", input);
        }
    }

    #[test]
    fn test_accepts_01_prefix() {
        let msisdn = Msisdn::parse("0110123456").unwrap();
        assert_eq!(msisdn.international(), "254110123456");
    }

    #[test]
    fn test_local_strips_country_code() {
        let msisdn = Msisdn::parse("0712345678").unwrap();
        assert_eq!(msisdn.local(), "712345678");
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(Msisdn::parse("not-a-number").is_err());
        assert!(Msisdn::parse("12345").is_err());
        assert!(Msisdn::parse("0812345678").is_err()); // not a mobile prefix
        assert!(Msisdn::parse("44712345678").is_err()); // wrong country
        assert!(Msisdn::parse("").is_err());
    }
}
