//! Phase sequencing: turns configured operations and a loaded fixture into an
//! ordered list of table operations.
//!
//! Ordering rules:
//! - members run in declared order for SETUP and reversed for TEARDOWN and
//!   ROLLBACK;
//! - inside a member every atomic operation covers all of the member's tables
//!   before the next operation starts;
//! - row-removing operations always visit tables in reverse declared order,
//!   everything else follows the phase direction;
//! - only the first member of a phase keeps `CLEAN_INSERT`, later members
//!   degrade to `INSERT` so they do not wipe what the earlier ones loaded.

use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    model::{DataSet, Dataset},
    operation::DbOperation,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Setup,
    Teardown,
    Rollback,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Setup => "SETUP",
            Phase::Teardown => "TEARDOWN",
            Phase::Rollback => "ROLLBACK",
        }
    }

    /// Whether members and tables are visited in reverse declared order.
    pub fn is_reversing(&self) -> bool {
        !matches!(self, Phase::Setup)
    }

    /// Operations to run for this phase.
    ///
    /// ROLLBACK reuses the teardown operations, falling back to `DELETE_ALL`
    /// when teardown would do nothing.
    pub fn operations(&self, set_up: &[DbOperation], tear_down: &[DbOperation]) -> Vec<DbOperation> {
        match self {
            Phase::Setup => set_up.to_vec(),
            Phase::Teardown => tear_down.to_vec(),
            Phase::Rollback => {
                if tear_down.iter().all(|operation| *operation == DbOperation::None) {
                    vec![DbOperation::DeleteAll]
                } else {
                    tear_down.to_vec()
                }
            }
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One atomic operation applied to the tables of one member dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanStep {
    pub operation: DbOperation,
    /// Index of the member dataset in declaration order.
    pub member: usize,
    pub tables: Vec<String>,
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [dataset {}]: {}",
            self.operation,
            self.member + 1,
            self.tables.iter().join(", ")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationPlan {
    phase: Phase,
    steps: Vec<PlanStep>,
}

impl OperationPlan {
    /// Builds the plan for `phase` over `members` (declaration order).
    pub fn for_phase(
        phase: Phase,
        set_up: &[DbOperation],
        tear_down: &[DbOperation],
        members: &[Dataset],
    ) -> Self {
        Self::build(phase, &phase.operations(set_up, tear_down), members)
    }

    /// Builds a plan from operations already resolved for `phase`.
    pub fn build(phase: Phase, operations: &[DbOperation], members: &[Dataset]) -> Self {
        let mut order = (0..members.len()).collect::<Vec<_>>();
        if phase.is_reversing() {
            order.reverse();
        }

        let mut steps = Vec::new();
        for (position, member_idx) in order.into_iter().enumerate() {
            let member = &members[member_idx];
            let declared = member.table_names();
            if declared.is_empty() {
                continue;
            }
            let atomic = operations
                .iter()
                .map(|operation| match operation {
                    DbOperation::CleanInsert if position > 0 => DbOperation::Insert,
                    other => *other,
                })
                .flat_map(|operation| operation.expand());
            for operation in atomic {
                let reverse = operation.is_destructive() || phase.is_reversing();
                let tables = if reverse {
                    declared.iter().rev().map(|name| name.to_string()).collect()
                } else {
                    declared.iter().map(|name| name.to_string()).collect()
                };
                steps.push(PlanStep {
                    operation,
                    member: member_idx,
                    tables,
                });
            }
        }
        Self { phase, steps }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Flattened `(operation, member, table)` sequence in execution order.
    pub fn table_operations(&self) -> impl Iterator<Item = (DbOperation, usize, &str)> + '_ {
        self.steps.iter().flat_map(|step| {
            step.tables
                .iter()
                .map(move |table| (step.operation, step.member, table.as_str()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CaseSensitivity, Table, TableSchema};

    fn dataset(tables: &[&str]) -> Dataset {
        Dataset::from_tables(
            CaseSensitivity::Insensitive,
            tables
                .iter()
                .map(|name| Table::new(TableSchema::new(*name, Vec::new(), CaseSensitivity::Insensitive).unwrap()))
                .collect(),
        )
    }

    fn flattened(plan: &OperationPlan) -> Vec<(DbOperation, usize, String)> {
        plan.table_operations()
            .map(|(operation, member, table)| (operation, member, table.to_string()))
            .collect()
    }

    #[test]
    fn teardown_visits_tables_in_reverse() {
        let members = vec![dataset(&["A", "B", "C"])];
        let plan = OperationPlan::for_phase(
            Phase::Teardown,
            &[DbOperation::CleanInsert],
            &[DbOperation::DeleteAll],
            &members,
        );
        let tables = plan.table_operations().map(|(_, _, table)| table).collect::<Vec<_>>();
        assert_eq!(tables, vec!["C", "B", "A"]);
    }

    #[test]
    fn clean_insert_degrades_after_first_member() {
        let members = vec![dataset(&["A"]), dataset(&["B"])];
        let plan = OperationPlan::for_phase(Phase::Setup, &[DbOperation::CleanInsert], &[], &members);
        assert_eq!(
            flattened(&plan),
            vec![
                (DbOperation::DeleteAll, 0, "A".to_string()),
                (DbOperation::Insert, 0, "A".to_string()),
                (DbOperation::Insert, 1, "B".to_string()),
            ]
        );
    }

    #[test]
    fn setup_clean_insert_deletes_children_first_then_inserts_parents_first() {
        let members = vec![dataset(&["PARENT", "CHILD"])];
        let plan = OperationPlan::for_phase(Phase::Setup, &[DbOperation::CleanInsert], &[], &members);
        assert_eq!(plan.steps().len(), 2);
        assert_eq!(plan.steps()[0].tables, vec!["CHILD", "PARENT"]);
        assert_eq!(plan.steps()[1].tables, vec!["PARENT", "CHILD"]);
    }

    #[test]
    fn rollback_substitutes_delete_all_for_none() {
        let members = vec![dataset(&["A", "B"])];
        let plan = OperationPlan::for_phase(
            Phase::Rollback,
            &[DbOperation::CleanInsert],
            &[DbOperation::None],
            &members,
        );
        assert_eq!(
            flattened(&plan),
            vec![
                (DbOperation::DeleteAll, 0, "B".to_string()),
                (DbOperation::DeleteAll, 0, "A".to_string()),
            ]
        );

        let explicit = OperationPlan::for_phase(
            Phase::Rollback,
            &[DbOperation::Insert],
            &[DbOperation::Delete],
            &members,
        );
        assert!(explicit.steps().iter().all(|step| step.operation == DbOperation::Delete));
    }

    #[test]
    fn none_produces_no_steps() {
        let members = vec![dataset(&["A"])];
        let plan = OperationPlan::for_phase(Phase::Teardown, &[DbOperation::Insert], &[DbOperation::None], &members);
        assert!(plan.is_empty());
    }

    #[test]
    fn composite_operations_run_across_all_tables_before_the_next() {
        let members = vec![dataset(&["A", "B"])];
        let plan = OperationPlan::for_phase(
            Phase::Setup,
            &[DbOperation::Update, DbOperation::Insert],
            &[],
            &members,
        );
        let operations = plan.table_operations().map(|(op, _, _)| op).collect::<Vec<_>>();
        assert_eq!(
            operations,
            vec![
                DbOperation::Update,
                DbOperation::Update,
                DbOperation::Insert,
                DbOperation::Insert
            ]
        );
    }

    #[test]
    fn teardown_reverses_member_order() {
        let members = vec![dataset(&["A"]), dataset(&["B"]), dataset(&["C"])];
        let plan = OperationPlan::for_phase(Phase::Teardown, &[], &[DbOperation::DeleteAll], &members);
        let members_visited = plan.steps().iter().map(|step| step.member).collect::<Vec<_>>();
        assert_eq!(members_visited, vec![2, 1, 0]);
    }

    #[test]
    fn step_display_lists_tables() {
        let step = PlanStep {
            operation: DbOperation::Insert,
            member: 0,
            tables: vec!["A".into(), "B".into()],
        };
        assert_eq!(step.to_string(), "INSERT [dataset 1]: A, B");
    }
}
