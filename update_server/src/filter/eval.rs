//! Filter evaluation against a single target.

use crate::models::Target;

use super::{CmpOp, Comparison, Field, FilterNode, Literal};

pub fn matches(node: &FilterNode, target: &Target) -> bool {
    match node {
        FilterNode::And(operands) => operands.iter().all(|n| matches(n, target)),
        FilterNode::Or(operands) => operands.iter().any(|n| matches(n, target)),
        FilterNode::Cmp(cmp) => compare(cmp, target),
    }
}

fn compare(cmp: &Comparison, target: &Target) -> bool {
    // Tag membership has set semantics rather than single-value semantics.
    if cmp.field == Field::Tag {
        return compare_tags(cmp, target);
    }

    let actual = field_value(&cmp.field, target);
    match cmp.op {
        CmpOp::Eq => match single(cmp) {
            Literal::Null => actual.is_none(),
            Literal::Value(expected) => actual.as_deref() == Some(expected.as_str()),
        },
        CmpOp::Ne => match single(cmp) {
            Literal::Null => actual.is_some(),
            Literal::Value(expected) => actual.as_deref() != Some(expected.as_str()),
        },
        CmpOp::Ge | CmpOp::Le | CmpOp::Gt | CmpOp::Lt => match (actual, single(cmp)) {
            (Some(actual), Literal::Value(expected)) => ordered(&actual, expected, cmp.op),
            _ => false,
        },
        CmpOp::In => actual
            .map(|actual| cmp.values.iter().any(|v| literal_eq(v, &actual)))
            .unwrap_or(false),
        CmpOp::Out => actual
            .map(|actual| !cmp.values.iter().any(|v| literal_eq(v, &actual)))
            .unwrap_or(true),
    }
}

fn compare_tags(cmp: &Comparison, target: &Target) -> bool {
    let has = |literal: &Literal| match literal {
        Literal::Value(tag) => target.tags.contains(tag.as_str()),
        Literal::Null => target.tags.is_empty(),
    };
    match cmp.op {
        CmpOp::Eq => has(single(cmp)),
        CmpOp::Ne => !has(single(cmp)),
        CmpOp::In => cmp.values.iter().any(has),
        CmpOp::Out => !cmp.values.iter().any(has),
        // Ordering operators are meaningless for tag sets.
        _ => false,
    }
}

fn single(cmp: &Comparison) -> &Literal {
    // Arity is validated at parse time.
    &cmp.values[0]
}

fn literal_eq(literal: &Literal, actual: &str) -> bool {
    matches!(literal, Literal::Value(v) if v == actual)
}

/// Ordered comparison: numeric when both sides parse as integers
/// (timestamps, distribution set ids), lexicographic otherwise.
fn ordered(actual: &str, expected: &str, op: CmpOp) -> bool {
    let ordering = match (actual.parse::<i64>(), expected.parse::<i64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => actual.cmp(expected),
    };
    match op {
        CmpOp::Ge => ordering.is_ge(),
        CmpOp::Le => ordering.is_le(),
        CmpOp::Gt => ordering.is_gt(),
        CmpOp::Lt => ordering.is_lt(),
        _ => unreachable!("ordered() called for non-ordering operator"),
    }
}

fn field_value(field: &Field, target: &Target) -> Option<String> {
    match field {
        Field::ControllerId => Some(target.controller_id.clone()),
        Field::Name => Some(target.name.clone()),
        Field::UpdateStatus => Some(target.update_status.as_str().to_string()),
        Field::LastContact => target.last_contact.map(|t| t.timestamp_millis().to_string()),
        Field::AssignedDs => target.assigned_ds.map(|id| id.to_string()),
        Field::InstalledDs => target.installed_ds.map(|id| id.to_string()),
        Field::Attribute(key) => target.attributes.get(key).cloned(),
        Field::Tag => None,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use crate::filter::FilterQuery;
    use crate::models::{Target, UpdateStatus};

    fn target() -> Target {
        let mut t = Target::new(Uuid::new_v4(), "dev01");
        t.update_status = UpdateStatus::Pending;
        t.tags.insert("beta".to_string());
        t.attributes.insert("hw".to_string(), "rev2".to_string());
        t.last_contact = Some(Utc::now() - Duration::minutes(10));
        t
    }

    fn q(expr: &str) -> FilterQuery {
        FilterQuery::parse(expr).unwrap()
    }

    #[test]
    fn equality_and_negation() {
        let t = target();
        assert!(q("controllerid==dev01").matches(&t));
        assert!(!q("controllerid==dev02").matches(&t));
        assert!(q("controllerid!=dev02").matches(&t));
        assert!(q("updatestatus==pending").matches(&t));
    }

    #[test]
    fn null_checks() {
        let t = target();
        assert!(q("assignedds==null").matches(&t));
        assert!(!q("assignedds!=null").matches(&t));
        let mut assigned = target();
        assigned.assigned_ds = Some(7);
        assert!(q("assignedds!=null").matches(&assigned));
        assert!(q("assignedds==7").matches(&assigned));
    }

    #[test]
    fn numeric_ordering_on_timestamps() {
        let t = target();
        let cutoff = (Utc::now() - Duration::minutes(5)).timestamp_millis();
        assert!(q(&format!("lastcontrollerrequestat=le={cutoff}")).matches(&t));
        assert!(!q(&format!("lastcontrollerrequestat=ge={cutoff}")).matches(&t));
    }

    #[test]
    fn tag_set_semantics() {
        let t = target();
        assert!(q("tag==beta").matches(&t));
        assert!(!q("tag==stable").matches(&t));
        assert!(q("tag=in=(stable,beta)").matches(&t));
        assert!(!q("tag=out=(beta)").matches(&t));
    }

    #[test]
    fn attributes_and_boolean_structure() {
        let t = target();
        assert!(q("attribute.hw==rev2;tag==beta").matches(&t));
        assert!(!q("attribute.hw==rev1;tag==beta").matches(&t));
        assert!(q("attribute.hw==rev1,tag==beta").matches(&t));
        assert!(q("attribute.missing==null").matches(&t));
    }

    #[test]
    fn in_out_on_scalar_fields() {
        let t = target();
        assert!(q("updatestatus=in=(pending,error)").matches(&t));
        assert!(q("updatestatus=out=(in_sync,error)").matches(&t));
        assert!(!q("updatestatus=out=(pending)").matches(&t));
    }
}
