use crate::MnarError;

/// An R-style model formula, e.g. `"severity_mnar ~ outcome + age + C(site)"`.
///
/// Terms wrapped in `C(..)` or `factor(..)` are treated as categorical and
/// expanded into first-level-dropped dummy columns by the design-matrix
/// builder; everything else is taken as numeric.
#[derive(Debug, Clone)]
pub struct ModelFormula {
    pub response: String,
    pub numeric_terms: Vec<String>,
    pub categorical_terms: Vec<String>,
}

impl ModelFormula {
    /// Parses a formula string of the form `response ~ term + term + C(term)`.
    pub fn parse(formula: &str) -> Result<ModelFormula, MnarError> {
        let parts: Vec<&str> = formula.split('~').collect();
        if parts.len() != 2 {
            return Err(MnarError::Validation(format!(
                "formula: expected 'response ~ terms', got '{}'",
                formula
            )));
        }

        let response = parts[0].trim().to_string();
        if response.is_empty() {
            return Err(MnarError::Validation(
                "formula: response variable is missing".to_string(),
            ));
        }

        let mut numeric_terms = Vec::new();
        let mut categorical_terms = Vec::new();
        for term in parts[1].split('+') {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            if let Some(inner) = unwrap_marker(term, "C(") {
                categorical_terms.push(inner);
            } else if let Some(inner) = unwrap_marker(term, "factor(") {
                categorical_terms.push(inner);
            } else {
                numeric_terms.push(term.to_string());
            }
        }

        if numeric_terms.is_empty() && categorical_terms.is_empty() {
            return Err(MnarError::Validation(format!(
                "formula: no predictor terms in '{}'",
                formula
            )));
        }

        Ok(ModelFormula {
            response,
            numeric_terms,
            categorical_terms,
        })
    }
}

fn unwrap_marker(term: &str, marker: &str) -> Option<String> {
    if term.starts_with(marker) && term.ends_with(')') {
        Some(term[marker.len()..term.len() - 1].trim().to_string())
    } else {
        None
    }
}
