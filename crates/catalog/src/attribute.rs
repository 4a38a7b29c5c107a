//! Attributes, attribute sets and the canonical variant signature.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use stockpile_core::{DomainError, ValueObject};

/// A named attribute with an ordered set of allowed values (e.g. Color:
/// [Red, Blue]). Value order is significant: it fixes the expansion order of
/// the Cartesian product and the naming of generated variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub values: Vec<String>,
}

impl Attribute {
    pub fn has_value(&self, value: &str) -> bool {
        self.values.iter().any(|v| v == value)
    }
}

/// The ordered set of attributes differentiating a template's variants.
///
/// Immutable once referenced by variants, except for adding new values to an
/// existing attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSet {
    pub attributes: Vec<Attribute>,
}

impl AttributeSet {
    pub fn new(attributes: Vec<Attribute>) -> Self {
        Self { attributes }
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn attribute_mut(&mut self, name: &str) -> Option<&mut Attribute> {
        self.attributes.iter_mut().find(|a| a.name == name)
    }

    /// Expand a selection (attribute name -> chosen values) into the full
    /// Cartesian product of signatures.
    ///
    /// - attribute order follows this set's ordering, not the selection's;
    /// - value order follows each attribute's declared value order;
    /// - an unknown attribute name or an undeclared value is a validation
    ///   error;
    /// - every attribute in the set must have at least one selected value.
    pub fn expand(
        &self,
        selections: &BTreeMap<String, Vec<String>>,
    ) -> Result<Vec<AttributeSignature>, DomainError> {
        for name in selections.keys() {
            if self.attribute(name).is_none() {
                return Err(DomainError::validation(format!(
                    "unknown attribute '{name}' in selection"
                )));
            }
        }

        let mut per_attribute: Vec<(String, Vec<String>)> = Vec::with_capacity(self.attributes.len());
        for attr in &self.attributes {
            let selected = selections.get(&attr.name).cloned().unwrap_or_default();
            if selected.is_empty() {
                return Err(DomainError::validation(format!(
                    "no values selected for attribute '{}'",
                    attr.name
                )));
            }
            for value in &selected {
                if !attr.has_value(value) {
                    return Err(DomainError::validation(format!(
                        "value '{}' is not declared for attribute '{}'",
                        value, attr.name
                    )));
                }
            }
            // Declared order, restricted to the selection.
            let ordered: Vec<String> = attr
                .values
                .iter()
                .filter(|v| selected.iter().any(|s| s == *v))
                .cloned()
                .collect();
            per_attribute.push((attr.name.clone(), ordered));
        }

        let mut combos: Vec<Vec<(String, String)>> = vec![Vec::new()];
        for (name, values) in &per_attribute {
            let mut next = Vec::with_capacity(combos.len() * values.len());
            for combo in &combos {
                for value in values {
                    let mut extended = combo.clone();
                    extended.push((name.clone(), value.clone()));
                    next.push(extended);
                }
            }
            combos = next;
        }

        Ok(combos.into_iter().map(AttributeSignature::new).collect())
    }
}

/// A variant's identity-defining value: one chosen value per attribute, in
/// attribute-set order. Equality and diffing use the canonical serialization,
/// so signature comparison is order-stable no matter how the selection was
/// supplied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSignature(Vec<(String, String)>);

impl AttributeSignature {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self(pairs)
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(_, v)| v.as_str())
    }

    /// Canonical serialization used for equality/diffing and for deriving the
    /// variant id (e.g. `Color=Red|Size=S`).
    pub fn canonical(&self) -> String {
        self.0
            .iter()
            .map(|(n, v)| format!("{n}={v}"))
            .collect::<Vec<_>>()
            .join("|")
    }
}

impl ValueObject for AttributeSignature {}

impl core::fmt::Display for AttributeSignature {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.canonical())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color_size_set() -> AttributeSet {
        AttributeSet::new(vec![
            Attribute {
                name: "Color".to_string(),
                values: vec!["Red".to_string(), "Blue".to_string()],
            },
            Attribute {
                name: "Size".to_string(),
                values: vec!["S".to_string(), "M".to_string(), "L".to_string()],
            },
        ])
    }

    fn select(pairs: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        pairs
            .iter()
            .map(|(n, vs)| (n.to_string(), vs.iter().map(|v| v.to_string()).collect()))
            .collect()
    }

    #[test]
    fn expand_produces_full_cartesian_product_in_declared_order() {
        let set = color_size_set();
        let signatures = set
            .expand(&select(&[("Color", &["Red", "Blue"]), ("Size", &["S", "M"])]))
            .unwrap();

        let canonical: Vec<String> = signatures.iter().map(|s| s.canonical()).collect();
        assert_eq!(
            canonical,
            vec![
                "Color=Red|Size=S",
                "Color=Red|Size=M",
                "Color=Blue|Size=S",
                "Color=Blue|Size=M",
            ]
        );
    }

    #[test]
    fn expansion_order_ignores_selection_value_order() {
        let set = color_size_set();
        // Values supplied in reverse; declared order wins.
        let signatures = set
            .expand(&select(&[("Color", &["Blue", "Red"]), ("Size", &["M", "S"])]))
            .unwrap();
        assert_eq!(signatures[0].canonical(), "Color=Red|Size=S");
        assert_eq!(signatures.len(), 4);
    }

    #[test]
    fn expand_rejects_unknown_attribute() {
        let set = color_size_set();
        let err = set
            .expand(&select(&[
                ("Color", &["Red"]),
                ("Size", &["S"]),
                ("Material", &["Steel"]),
            ]))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn expand_rejects_undeclared_value() {
        let set = color_size_set();
        let err = set
            .expand(&select(&[("Color", &["Green"]), ("Size", &["S"])]))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn expand_rejects_missing_attribute_selection() {
        let set = color_size_set();
        let err = set.expand(&select(&[("Color", &["Red"])])).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn canonical_signature_is_stable() {
        let sig = AttributeSignature::new(vec![
            ("Color".to_string(), "Red".to_string()),
            ("Size".to_string(), "S".to_string()),
        ]);
        assert_eq!(sig.canonical(), "Color=Red|Size=S");
        assert_eq!(sig.values().collect::<Vec<_>>(), vec!["Red", "S"]);
    }
}
