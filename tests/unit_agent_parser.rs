use assert_matches::assert_matches;
use sheetops::agent::parse_agent_response_with;
use sheetops::apply::apply_ops;
use sheetops::ops::{Author, EditOperation, OpIdBatch, SortDirection};

mod support;

fn parse(text: &str) -> Vec<EditOperation> {
    let state = support::builders::contacts();
    parse_agent_response_with(text, &state.columns, &state.rows, &mut OpIdBatch::with_stamp(1700))
}

#[test]
fn cell_update_maps_letters_to_column_ids() {
    let ops = parse(
        "Done!\n```json\n{\"operations\":[{\"type\":\"cell_update\",\"row\":2,\"column\":\"B\",\"value\":\"grace@example.com\"},\
         {\"type\":\"cell_update\",\"row\":\"1\",\"column\":\"c\",\"value\":42}]}\n```",
    );

    assert_eq!(ops.len(), 2);
    assert_matches!(
        &ops[0],
        EditOperation::CellUpdate {
            id,
            author: Author::Agent,
            row_id,
            column_id,
            new_value,
            materialize: false,
            ..
        } => {
            assert_eq!(id, "op-1700-0");
            assert_eq!(row_id, "r2");
            assert_eq!(column_id, "email");
            assert_eq!(new_value.as_deref(), Some("grace@example.com"));
        }
    );
    assert_matches!(&ops[1], EditOperation::CellUpdate { row_id, column_id, new_value, .. } => {
        assert_eq!(row_id, "r1");
        assert_eq!(column_id, "amount");
        assert_eq!(new_value.as_deref(), Some("42"));
    });
}

#[test]
fn out_of_range_letters_fall_back_to_positional_ids() {
    let ops = parse(
        "```json\n{\"operations\":[{\"type\":\"cell_update\",\"row\":1,\"column\":\"E\",\"value\":null}]}\n```",
    );
    assert_matches!(&ops[..], [EditOperation::CellUpdate { column_id, new_value, .. }] => {
        assert_eq!(column_id, "col_4");
        assert_eq!(new_value.as_deref(), Some(""));
    });
}

#[test]
fn row_insert_materializes_one_new_row() {
    let text = "```json\n{\"operations\":[{\"type\":\"row_insert\",\"values\":[\"Alan\",\"alan@example.com\",5]}]}\n```";
    let ops = parse(text);

    assert_eq!(ops.len(), 3);
    assert!(ops.iter().all(|op| matches!(
        op,
        EditOperation::CellUpdate { materialize: true, row_id, .. } if row_id == "r-new-1700-0"
    )));
    assert_eq!(ops[2].id(), "op-1700-insert-0-2-2");

    let preview = apply_ops(&support::builders::contacts(), &ops);
    assert_eq!(preview.rows.len(), 4);
    assert_eq!(preview.cell("r-new-1700-0", "amount"), Some("5"));
}

#[test]
fn row_delete_and_sort_operations() {
    let ops = parse(
        "```json\n{\"operations\":[\
         {\"type\":\"row_delete\",\"row\":3},\
         {\"type\":\"sort\",\"column\":\"C\",\"direction\":\"DESC\"},\
         {\"type\":\"sort\"}]}\n```",
    );

    assert_eq!(ops.len(), 3);
    assert_matches!(&ops[0], EditOperation::RowDelete { row_id, .. } if row_id == "r3");
    assert_matches!(
        &ops[1],
        EditOperation::Sort { column_id, direction: SortDirection::Desc, .. }
            if column_id == "amount"
    );
    assert_matches!(
        &ops[2],
        EditOperation::Sort { column_id, direction: SortDirection::Asc, .. } if column_id == "name"
    );
}

#[test]
fn sorted_data_rewrites_every_cell() {
    let ops = parse(
        "```json\n{\"operations\":[{\"type\":\"sort\",\"sorted_data\":[[\"Z\",\"z@z.io\"],[\"Y\"]]}]}\n```",
    );

    assert_eq!(ops.len(), 6);
    let preview = apply_ops(&support::builders::contacts(), &ops);
    assert_eq!(preview.cell("r1", "name"), Some("Z"));
    assert_eq!(preview.cell("r1", "amount"), Some(""));
    assert_eq!(preview.cell("r2", "email"), Some(""));
    assert_eq!(preview.cell("r3", "name"), Some("Linus"));
}

#[test]
fn unusable_entries_are_skipped_individually() {
    let ops = parse(
        "```json\n{\"operations\":[{\"type\":\"explode\"},{\"type\":\"cell_update\",\"row\":1},\
         {\"type\":\"cell_update\",\"row\":1,\"column\":\"1A\",\"value\":\"x\"},\
         {\"type\":\"row_delete\",\"row\":2}]}\n```",
    );
    assert_matches!(&ops[..], [EditOperation::RowDelete { row_id, .. }] if row_id == "r2");
}

#[test]
fn legacy_arrays_pass_through() {
    let ops = parse(
        "```json\n[{\"rowId\":\"r1\",\"columnId\":\"name\",\"oldValue\":\"Ada\",\"newValue\":\"Ada L.\"},\
         {\"type\":\"column_add\",\"columnId\":\"status\",\"columnLabel\":\"Status\"},\
         {\"type\":\"row_insert\",\"values\":[\"New\"]},\
         {\"type\":\"teleport\"}]\n```",
    );

    assert_eq!(ops.len(), 3);
    assert_matches!(
        &ops[0],
        EditOperation::CellUpdate { old_value, new_value, materialize: false, .. } => {
            assert_eq!(old_value.as_deref(), Some("Ada"));
            assert_eq!(new_value.as_deref(), Some("Ada L."));
        }
    );
    assert_matches!(
        &ops[1],
        EditOperation::ColumnAdd { column_label: Some(label), .. } if label == "Status"
    );
    assert_matches!(
        &ops[2],
        EditOperation::CellUpdate { row_id, materialize: true, .. } if row_id == "r-inserted-1700-2"
    );
}

#[test]
fn delete_phrases_are_a_fallback() {
    let ops = parse("Sure. I will delete row 2 and Delete Row 9 as requested.");
    assert_matches!(
        &ops[..],
        [EditOperation::RowDelete { row_id, author: Author::Agent, .. }] if row_id == "r2"
    );
}

#[test]
fn non_operation_json_falls_back_to_phrases() {
    let ops = parse("```json\n{\"status\":\"CONNECTED\"}\n```\ndelete row 1");
    assert_matches!(&ops[..], [EditOperation::RowDelete { row_id, .. }] if row_id == "r1");
}

#[test]
fn plain_text_yields_nothing() {
    assert!(parse("The sheet looks fine to me.").is_empty());
    assert!(parse("```json\n{not json\n```").is_empty());
}
