use metaschema_model::{
    ColumnDef, ForeignKeyDef, IndexDef, MigrationOp, MigrationRecord, MigrationStep,
    ReferentialAction, TableShape, apply_op,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn base() -> TableShape {
    let mut shape = TableShape::new("main", "fin_invoices");
    shape.columns.push(ColumnDef::new("id", "TEXT").primary_key());
    shape.columns.push(ColumnDef::new("tenant_id", "TEXT").not_null());
    shape.columns.push(ColumnDef::new("number", "VARCHAR(32)").not_null().unique());
    shape
}

fn apply_all(mut shape: Option<TableShape>, ops: &[MigrationOp]) -> Option<TableShape> {
    for op in ops {
        shape = apply_op(shape, op).unwrap();
    }
    shape
}

// ── apply_op ─────────────────────────────────────────────────────

#[test]
fn add_column_then_index() {
    let ops = vec![
        MigrationOp::AddColumn {
            column: ColumnDef::new("due_date", "DATE"),
        },
        MigrationOp::AddIndex {
            index: IndexDef {
                name: "idx_fin_invoices_due_date".into(),
                columns: vec!["due_date".into()],
                unique: false,
            },
        },
    ];
    let shape = apply_all(Some(base()), &ops).unwrap();
    assert!(shape.has_column("due_date"));
    assert!(shape.index("idx_fin_invoices_due_date").is_some());
}

#[test]
fn duplicate_column_is_rejected() {
    let op = MigrationOp::AddColumn {
        column: ColumnDef::new("number", "TEXT"),
    };
    assert!(apply_op(Some(base()), &op).is_err());
}

#[test]
fn foreign_key_requires_column() {
    let fk = ForeignKeyDef {
        column: "customer_id".into(),
        ref_table: "crm_customers".into(),
        ref_column: "id".into(),
        on_delete: ReferentialAction::Cascade,
        on_update: ReferentialAction::NoAction,
    };
    assert_eq!(fk.name(), "fk_customer_id");
    let op = MigrationOp::AddForeignKey { foreign_key: fk };
    assert!(apply_op(Some(base()), &op).is_err());
}

#[test]
fn rename_tracks_table_name() {
    let op = MigrationOp::RenameTable {
        schema: "main".into(),
        from: "fin_invoices".into(),
        to: "fin_bills".into(),
    };
    let shape = apply_op(Some(base()), &op).unwrap().unwrap();
    assert_eq!(shape.table, "fin_bills");
}

#[test]
fn ops_need_a_table() {
    let op = MigrationOp::AddColumn {
        column: ColumnDef::new("x", "TEXT"),
    };
    assert!(apply_op(None, &op).is_err());
}

// ── Records ──────────────────────────────────────────────────────

#[test]
fn downgrade_is_reversed_rollbacks() {
    let steps = vec![
        MigrationStep::new(MigrationOp::AddColumn {
            column: ColumnDef::new("a", "TEXT"),
        }),
        MigrationStep::new(MigrationOp::AddColumn {
            column: ColumnDef::new("b", "TEXT"),
        }),
    ];
    let (upgrade, downgrade) = MigrationRecord::split_steps(&steps);
    assert_eq!(upgrade[0].kind(), "add_column");
    assert_eq!(
        downgrade,
        vec![
            MigrationOp::DropColumn {
                column: ColumnDef::new("b", "TEXT")
            },
            MigrationOp::DropColumn {
                column: ColumnDef::new("a", "TEXT")
            },
        ]
    );
}

#[test]
fn op_serializes_with_tag() {
    let op = MigrationOp::AddColumn {
        column: ColumnDef::new("due_date", "date"),
    };
    let value = serde_json::to_value(&op).unwrap();
    assert_eq!(value["op"], "add_column");
    assert_eq!(value["column"]["sql_type"], "DATE");
    assert_eq!(op.to_string(), "add_column due_date DATE");
}

// ── Properties ───────────────────────────────────────────────────

fn column_strategy() -> impl Strategy<Value = ColumnDef> {
    (
        "[a-z]{1,6}",
        prop_oneof![Just("TEXT"), Just("INTEGER"), Just("DATE"), Just("REAL")],
        any::<bool>(),
    )
        .prop_map(|(name, ty, nullable)| {
            let col = ColumnDef::new(&format!("c_{name}"), ty);
            if nullable { col } else { col.not_null().with_default("0") }
        })
}

proptest! {
    #[test]
    fn applying_op_then_inverse_restores_shape(cols in prop::collection::vec(column_strategy(), 1..6)) {
        let mut shape = base();
        for col in cols {
            let op = MigrationOp::AddColumn { column: col };
            let Ok(Some(after)) = apply_op(Some(shape.clone()), &op) else { continue };
            let restored = apply_op(Some(after.clone()), &op.inverse()).unwrap().unwrap();
            prop_assert!(restored.structurally_eq(&shape));
            shape = after;
        }
    }

    #[test]
    fn inverse_is_an_involution(col in column_strategy(), other in column_strategy()) {
        let ops = [
            MigrationOp::AddColumn { column: col.clone() },
            MigrationOp::AlterType { from: col.clone(), to: ColumnDef { name: col.name.clone(), ..other } },
        ];
        for op in ops {
            prop_assert_eq!(op.inverse().inverse(), op);
        }
    }
}
