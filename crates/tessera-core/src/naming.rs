//! Word splitting and PascalCase normalisation for identifiers

/// Split an arbitrary string into alphanumeric words.
///
/// Non-alphanumeric characters act as separators and are dropped. A word
/// also ends wherever the next character is an upper-case letter, so
/// `"fooBar_baz"` yields `["foo", "Bar", "baz"]`.
pub fn to_words(key: &str) -> Vec<String> {
    let chars: Vec<char> = key.chars().collect();
    let mut words = Vec::new();
    let mut word = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_ascii_alphanumeric() {
            continue;
        }
        word.push(c);

        let continues = chars
            .get(i + 1)
            .map_or(false, |&next| next.is_ascii_lowercase() || next.is_ascii_digit());
        if !continues && !c.is_ascii_uppercase() {
            words.push(std::mem::take(&mut word));
        }
    }
    if !word.is_empty() {
        words.push(word);
    }

    words
}

/// Convert an alphanumeric string to PascalCase
pub fn pascal_case(key: &str) -> String {
    to_words(key)
        .iter()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect()
}

/// True if the string is already in PascalCase
pub fn is_pascal_case(s: &str) -> bool {
    s == pascal_case(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_words_separators() {
        assert_eq!(to_words("service_test.data"), vec!["service", "test", "data"]);
        assert_eq!(to_words("  spaced  out "), vec!["spaced", "out"]);
        assert!(to_words("__").is_empty());
    }

    #[test]
    fn test_to_words_case_boundaries() {
        assert_eq!(to_words("fooBarBaz"), vec!["foo", "Bar", "Baz"]);
        assert_eq!(to_words("Service_testservice"), vec!["Service", "testservice"]);
        assert_eq!(to_words("item42Count"), vec!["item42", "Count"]);
    }

    #[test]
    fn test_to_words_upper_runs() {
        // a word only closes on a lower-case letter or digit
        assert_eq!(to_words("HTTPServer"), vec!["HTTPServer"]);
        assert_eq!(to_words("ABC"), vec!["ABC"]);
    }

    #[test]
    fn test_pascal_case() {
        assert_eq!(pascal_case("Service_testservice"), "ServiceTestservice");
        assert_eq!(pascal_case("user profile"), "UserProfile");
        assert_eq!(pascal_case("HTTPServer"), "Httpserver");
        assert_eq!(pascal_case(""), "");
    }

    #[test]
    fn test_is_pascal_case() {
        assert!(is_pascal_case("ServiceCounter"));
        assert!(!is_pascal_case("serviceCounter"));
        assert!(!is_pascal_case("Service_Counter"));
    }
}
