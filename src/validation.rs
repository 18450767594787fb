//! Reusable validation framework consumed by the host (and, in principle, cluster) state
//! machines. A `Validation<C>` is a `(condition, category, printer)` triple; a `Validations<C>`
//! is a list of them that knows how to (a) fold itself into a single pass/fail condition and
//! (b) render a diagnostic map of every failing member, grouped by category, for use as
//! `status_info`.
//!
//! Grounded on `internal/statemachine/validations.go` in the original system: `Validation`,
//! `Validations.Condition()`, and `printValidationFailures` map directly onto the types below.

use std::collections::BTreeMap;

use bm_api::error::EngineError;

/// A single named check against some context `C` (typically a borrowed view of a host plus its
/// decoded inventory and cluster). Returns `Ok(true)` when the check passes.
pub struct Validation<C> {
    category: &'static str,
    condition: Box<dyn Fn(&C) -> Result<bool, EngineError> + Send + Sync>,
    printer: Box<dyn Fn(&C) -> Result<String, EngineError> + Send + Sync>,
}

impl<C> Validation<C> {
    pub fn new(
        category: &'static str,
        condition: impl Fn(&C) -> Result<bool, EngineError> + Send + Sync + 'static,
        printer: impl Fn(&C) -> Result<String, EngineError> + Send + Sync + 'static,
    ) -> Self {
        Validation {
            category,
            condition: Box::new(condition),
            printer: Box::new(printer),
        }
    }

    fn passes(&self, ctx: &C) -> Result<bool, EngineError> {
        (self.condition)(ctx)
    }

    fn explain(&self, ctx: &C) -> Result<String, EngineError> {
        (self.printer)(ctx)
    }
}

/// An ordered group of validations. The group's composite condition is the conjunction of its
/// members; this is what a refresh rule's guard checks.
pub struct Validations<C>(Vec<Validation<C>>);

impl<C> Validations<C> {
    pub fn new(members: Vec<Validation<C>>) -> Self {
        Validations(members)
    }

    /// Appends another group's members in place, for rules (like `sufficient_for_install`) that
    /// re-check an earlier group's conditions plus some of their own.
    pub fn extend(&mut self, other: Validations<C>) {
        self.0.extend(other.0);
    }

    /// `true` iff every member validation passes.
    pub fn all_pass(&self, ctx: &C) -> Result<bool, EngineError> {
        for member in &self.0 {
            if !member.passes(ctx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Render every failing member's formatted message, grouped by category. Empty when
    /// `all_pass` would return `true`. This is what gets JSON-serialized into `status_info`.
    pub fn diagnostics(&self, ctx: &C) -> Result<BTreeMap<String, Vec<String>>, EngineError> {
        let mut failures: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for member in &self.0 {
            if !member.passes(ctx)? {
                failures
                    .entry(member.category.to_string())
                    .or_default()
                    .push(member.explain(ctx)?);
            }
        }
        Ok(failures)
    }
}

/// Serialize a diagnostic map the way a validation-driven Refresh rule persists it as
/// `status_info`: a stable JSON object of `{category: [message, ...]}`.
pub fn diagnostics_to_status_info(
    diagnostics: &BTreeMap<String, Vec<String>>,
) -> Result<String, EngineError> {
    use bm_api::error::{InternalError, ReportError};

    serde_json::to_string(diagnostics).structured(InternalError::Internal(
        "failed to serialize validation diagnostics",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ctx {
        value: i64,
    }

    #[test]
    fn all_pass_short_circuits_on_first_failure() {
        let validations = Validations::new(vec![
            Validation::new("a", |c: &Ctx| Ok(c.value > 0), |_| Ok("must be positive".into())),
            Validation::new("b", |c: &Ctx| Ok(c.value < 10), |_| Ok("must be small".into())),
        ]);
        assert!(validations.all_pass(&Ctx { value: 5 }).unwrap());
        assert!(!validations.all_pass(&Ctx { value: -1 }).unwrap());
        assert!(!validations.all_pass(&Ctx { value: 20 }).unwrap());
    }

    #[test]
    fn diagnostics_group_by_category() {
        let validations = Validations::new(vec![
            Validation::new("hardware", |c: &Ctx| Ok(c.value > 0), |_| {
                Ok("value must be positive".into())
            }),
            Validation::new("hardware", |c: &Ctx| Ok(c.value < 10), |_| {
                Ok("value must be under 10".into())
            }),
            Validation::new("network", |_: &Ctx| Ok(true), |_| Ok("unreachable".into())),
        ]);
        let diagnostics = validations.diagnostics(&Ctx { value: -5 }).unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics["hardware"],
            vec!["value must be positive".to_string(), "value must be under 10".to_string()]
        );

        let json = diagnostics_to_status_info(&diagnostics).unwrap();
        assert!(json.contains("value must be positive"));
    }
}
