/// Curator actions for article and author submissions

use crate::{
    runtime::{
        actions::{Action, HumanInput},
        scheduler::Dispatch,
    },
    workflow::types::{ExtraData, WorkflowObject},
};
use serde_json::{json, Value};

fn title(object: &WorkflowObject) -> Option<&str> {
    object.data.pointer("/titles/0/title").and_then(Value::as_str)
}

fn unknown_decision(value: &str, allowed: &[&str]) -> String {
    format!(
        "unknown decision '{}', expected one of: {}",
        value,
        allowed.join(", ")
    )
}

/// Accept, accept as core, or reject an article submission
pub struct HepApproval;

impl HepApproval {
    const DECISIONS: [&'static str; 3] = ["accept", "accept_core", "reject"];
}

impl Action for HepApproval {
    fn name(&self) -> &str {
        "hep_approval"
    }

    fn render(&self, object: &WorkflowObject) -> Value {
        let prediction = object.extra_data.relevance_prediction.as_ref();
        json!({
            "title": title(object),
            "arxiv": object.data.pointer("/arxiv_eprints/0/value"),
            "prediction": prediction.map(|p| json!({
                "decision": p.decision,
                "score": p.max_score,
            })),
            "decisions": Self::DECISIONS,
        })
    }

    fn apply(&self, extra: &mut ExtraData, input: &HumanInput) -> Result<(), String> {
        let (approved, core) = match input.decision_value.as_str() {
            "accept" => (true, Some(false)),
            "accept_core" => (true, Some(true)),
            "reject" => (false, None),
            other => return Err(unknown_decision(other, &Self::DECISIONS)),
        };

        extra.approved = Some(approved);
        extra.core = core;
        extra.reason = input.reason.clone();
        Ok(())
    }
}

/// Accept or reject an author profile submission
pub struct AuthorApproval;

impl Action for AuthorApproval {
    fn name(&self) -> &str {
        "author_approval"
    }

    fn render(&self, object: &WorkflowObject) -> Value {
        json!({
            "name": object.data.pointer("/name/value"),
            "orcid": object.data.pointer("/ids/0/value"),
            "decisions": ["accept", "reject"],
        })
    }

    fn apply(&self, extra: &mut ExtraData, input: &HumanInput) -> Result<(), String> {
        let approved = match input.decision_value.as_str() {
            "accept" => true,
            "reject" => false,
            other => return Err(unknown_decision(other, &["accept", "reject"])),
        };

        extra.approved = Some(approved);
        extra.reason = input.reason.clone();
        Ok(())
    }
}

/// Merge a matched submission into the existing record or keep both
///
/// Resolved inline: the curator waits for the continuation to finish.
pub struct MergeApproval;

impl Action for MergeApproval {
    fn name(&self) -> &str {
        "merge_approval"
    }

    fn dispatch(&self) -> Dispatch {
        Dispatch::Inline
    }

    fn render(&self, object: &WorkflowObject) -> Value {
        json!({
            "title": title(object),
            "matched_control_number": object.data.get("matched_control_number"),
            "decisions": ["merge", "keep_both"],
        })
    }

    fn apply(&self, extra: &mut ExtraData, input: &HumanInput) -> Result<(), String> {
        match input.decision_value.as_str() {
            "merge" | "keep_both" => {
                extra.scratch.insert(
                    "merge_decision".to_string(),
                    Value::String(input.decision_value.clone()),
                );
                Ok(())
            }
            other => Err(unknown_decision(other, &["merge", "keep_both"])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn input(decision: &str) -> HumanInput {
        HumanInput {
            user_id: "curator@example.org".to_string(),
            decision_value: decision.to_string(),
            reason: Some("checked".to_string()),
            extra_flags: Map::new(),
        }
    }

    #[test]
    fn hep_approval_writes_decision_fields() {
        let mut extra = ExtraData::default();
        HepApproval.apply(&mut extra, &input("accept_core")).unwrap();
        assert_eq!(extra.approved, Some(true));
        assert_eq!(extra.core, Some(true));
        assert_eq!(extra.reason.as_deref(), Some("checked"));

        HepApproval.apply(&mut extra, &input("reject")).unwrap();
        assert_eq!(extra.approved, Some(false));
        assert_eq!(extra.core, None);
    }

    #[test]
    fn unknown_decisions_are_rejected() {
        let mut extra = ExtraData::default();
        let err = HepApproval.apply(&mut extra, &input("maybe")).unwrap_err();
        assert!(err.contains("accept_core"));
        assert!(AuthorApproval.apply(&mut extra, &input("merge")).is_err());
        assert!(MergeApproval.apply(&mut extra, &input("accept")).is_err());
        assert_eq!(extra, ExtraData::default());
    }

    #[test]
    fn merge_approval_is_inline() {
        let mut extra = ExtraData::default();
        MergeApproval.apply(&mut extra, &input("keep_both")).unwrap();
        assert_eq!(extra.scratch["merge_decision"], json!("keep_both"));
        assert_eq!(MergeApproval.dispatch(), Dispatch::Inline);
    }
}
