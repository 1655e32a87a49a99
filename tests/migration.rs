//! End-to-end migration, backup and restore scenarios

mod common;

use common::*;
use xformshift::storage::{BackupStore, SchemaStore};
use xformshift::{
    AnswerTree, ChangeSet, Database, Decisions, FieldMigrator, MigrationEngine, MigrationError,
    MigrationPlan, SchemaTree,
};

fn answer_tree(db: &Database, form: &str, index: usize) -> AnswerTree {
    let engine = MigrationEngine::new(db, config());
    AnswerTree::parse(&engine.answers(form).unwrap()[index].xml).unwrap()
}

#[test]
fn survey_answers_follow_the_new_schema() {
    let db = Database::open_in_memory().unwrap();
    let engine = MigrationEngine::new(&db, config());
    engine.register(SURVEY, "").unwrap();
    engine.submit("Survey", SURVEY_ANSWER).unwrap();

    let outcome = engine.update("Survey", SURVEY2, &survey_decisions()).unwrap();
    assert_eq!(outcome.diff.type_changes.len(), 1);
    assert_eq!(outcome.diff.option_changes.added["gender"], vec!["unknown"]);
    assert!(!outcome.diff.obligation_changes["location"]);

    let tree = answer_tree(&db, "Survey", 0);
    assert_eq!(tree.field_text("first_name").unwrap(), "Alonzo Church");
    assert_eq!(tree.field_text("last_name").unwrap(), "Fowler");
    assert_eq!(tree.field_text("birthday").unwrap(), "");
    assert_eq!(tree.field_text("age").unwrap(), "50");
    assert!(!tree.has_field("date"));
    assert!(!tree.has_field("name"));
}

#[test]
fn restoring_latest_backup_recovers_original_state() {
    let db = Database::open_in_memory().unwrap();
    let engine = MigrationEngine::new(&db, config());
    let form = engine.register(SURVEY, "").unwrap();
    engine.submit("Survey", SURVEY_ANSWER).unwrap();
    engine.update("Survey", SURVEY2, &survey_decisions()).unwrap();

    // Submitted after the migration, in the new shape
    engine.submit("Survey", SURVEY2_ANSWER).unwrap();

    let report = engine.restore("Survey", None, true).unwrap();
    assert_eq!(report.version_id, form.current_version.unwrap());
    assert_eq!(report.restored_verbatim, 1);
    assert_eq!(report.migrated, 1);
    assert_eq!(report.orphaned, 0);

    assert_eq!(db.load_schema("Survey", None).unwrap(), SURVEY);
    assert_eq!(engine.answers("Survey").unwrap()[0].xml, SURVEY_ANSWER);

    let newer = answer_tree(&db, "Survey", 1);
    assert_eq!(newer.field_text("name").unwrap(), "Ada");
    assert_eq!(newer.field_text("date").unwrap(), "");
    assert!(!newer.has_field("first_name"));
    assert!(!newer.has_field("last_name"));
    assert!(!newer.has_field("birthday"));

    let history = engine.history("Survey").unwrap();
    assert!(history[0].current);
    assert_eq!(db.get_form("Survey").unwrap().unwrap().title, "Survey");
}

#[test]
fn restoring_to_a_root_version_equals_the_merged_reverse() {
    let db = Database::open_in_memory().unwrap();
    let engine = MigrationEngine::new(&db, config());

    let v0 = form("chain", "v0", "<a/><b/><c/>");
    let v1 = form("chain", "v1", "<a1/><b/><c/>");
    let v2 = form("chain", "v2", "<a1/><b1/><c/>");

    let root = engine.register(&v0, "").unwrap().current_version.unwrap();
    engine
        .submit("chain", &answer("chain", "11111111-0000-4000-8000-000000000001", "<a>x</a><b>y</b><c>z</c>"))
        .unwrap();

    let first = engine
        .update("chain", &v1, &Decisions::from_pairs([("determine_a1", "a")]).unwrap())
        .unwrap();
    let second = engine
        .update("chain", &v2, &Decisions::from_pairs([("determine_b1", "b")]).unwrap())
        .unwrap();
    let at_v2 = engine.answers("chain").unwrap()[0].xml.clone();

    let composite = ChangeSet::merge_all([&second.changeset.reverse(), &first.changeset.reverse()]);
    let mut expected = AnswerTree::parse(&at_v2).unwrap();
    FieldMigrator::new(&MigrationPlan {
        changeset: composite.clone(),
        ..MigrationPlan::default()
    })
    .alter_fields(&mut expected)
    .unwrap();

    let report = engine.restore("chain", Some(root), false).unwrap();
    assert_eq!(report.changeset, composite);
    assert_eq!(engine.answers("chain").unwrap()[0].xml, expected.to_xml().unwrap());

    let tree = answer_tree(&db, "chain", 0);
    assert_eq!(tree.field_text("a").unwrap(), "x");
    assert_eq!(tree.field_text("b").unwrap(), "y");
    assert_eq!(tree.field_text("c").unwrap(), "z");
    assert_eq!(db.load_schema("chain", None).unwrap(), v0);
}

#[test]
fn restore_across_branches_goes_through_the_common_ancestor() {
    let db = Database::open_in_memory().unwrap();
    let engine = MigrationEngine::new(&db, config());

    let v0 = form("branch", "v0", "<a/><b/>");
    let v1 = form("branch", "v1", "<left/><b/>");
    let v2 = form("branch", "v2", "<a/><right/>");

    let root = engine.register(&v0, "").unwrap().current_version.unwrap();
    engine
        .submit("branch", &answer("branch", "11111111-0000-4000-8000-000000000002", "<a>1</a><b>2</b>"))
        .unwrap();

    let left = engine
        .update("branch", &v1, &Decisions::from_pairs([("determine_left", "a")]).unwrap())
        .unwrap()
        .version
        .unwrap();
    engine.restore("branch", Some(root), false).unwrap();
    let right = engine
        .update("branch", &v2, &Decisions::from_pairs([("determine_right", "b")]).unwrap())
        .unwrap()
        .version
        .unwrap();

    // right → root → left
    let report = engine.restore("branch", Some(left), false).unwrap();
    assert_eq!(report.version_id, left);

    let tree = answer_tree(&db, "branch", 0);
    assert_eq!(tree.field_text("left").unwrap(), "1");
    assert_eq!(tree.field_text("b").unwrap(), "2");
    assert!(!tree.has_field("right"));

    let history = engine.history("branch").unwrap();
    let parents: Vec<_> = history.iter().map(|h| h.parent).collect();
    assert_eq!(parents, vec![None, Some(root), Some(root)]);
    assert!(history.iter().find(|h| h.id == left).unwrap().current);
    assert!(!history.iter().find(|h| h.id == right).unwrap().current);
}

#[test]
fn fields_moving_into_groups_are_relocated() {
    let db = Database::open_in_memory().unwrap();
    let engine = MigrationEngine::new(&db, config());

    let flat = form("grouped", "flat", "<name/><age/><city/>");
    let nested = form(
        "grouped",
        "nested",
        "<person><name/><details><age/></details></person><city/><extra><note/></extra>",
    );

    engine.register(&flat, "").unwrap();
    engine
        .submit(
            "grouped",
            &answer("grouped", "11111111-0000-4000-8000-000000000003", "<name>Kurt</name><age>40</age><city>Vienna</city>"),
        )
        .unwrap();

    let outcome = engine.update("grouped", &nested, &Decisions::new()).unwrap();
    assert_eq!(outcome.migration.unwrap().fields_relocated, 2);

    let tree = answer_tree(&db, "grouped", 0);
    assert_eq!(tree.field_group_path("name").unwrap(), vec!["person"]);
    assert_eq!(tree.field_group_path("age").unwrap(), vec!["person", "details"]);
    assert_eq!(tree.field_group_path("note").unwrap(), vec!["extra"]);
    assert!(tree.field_group_path("city").unwrap().is_empty());
    assert_eq!(tree.field_text("age").unwrap(), "40");
}

#[test]
fn restore_requests_must_be_unambiguous() {
    let db = Database::open_in_memory().unwrap();
    let engine = MigrationEngine::new(&db, config());
    engine.register(SURVEY, "").unwrap();

    for (version, last) in [(Some(1), true), (None, false), (Some(999), false)] {
        let err = engine.restore("Survey", version, last).unwrap_err();
        assert!(
            matches!(
                err.downcast_ref::<MigrationError>(),
                Some(MigrationError::BackupRestore(_))
            ),
            "unexpected error: {:?}",
            err
        );
    }

    // No backup exists yet
    let err = engine.restore("Survey", None, true).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<MigrationError>(),
        Some(MigrationError::BackupRestore(_))
    ));
}

#[test]
fn failed_migration_leaves_everything_untouched() {
    let db = Database::open_in_memory().unwrap();
    let engine = MigrationEngine::new(&db, config());

    let v0 = form("atomic", "v0", "<a/><b/>");
    let v1 = form("atomic", "v1", "<g><a/></g><b/>");
    engine.register(&v0, "").unwrap();
    engine
        .submit("atomic", &answer("atomic", "11111111-0000-4000-8000-000000000004", "<a>1</a><b>2</b>"))
        .unwrap();
    // Second answer already holds a value where the new group must go
    engine
        .submit("atomic", &answer("atomic", "11111111-0000-4000-8000-000000000005", "<a>1</a><b>2</b><g>oops</g>"))
        .unwrap();

    let err = engine.update("atomic", &v1, &Decisions::new()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<MigrationError>(),
        Some(MigrationError::GroupConflict { .. })
    ));

    assert_eq!(db.load_schema("atomic", None).unwrap(), v0);
    assert_eq!(engine.history("atomic").unwrap().len(), 1);
    assert!(db.latest_backup("atomic").unwrap().is_none());
    let first = answer_tree(&db, "atomic", 0);
    assert!(first.field_group_path("a").unwrap().is_empty());
}

#[test]
fn uploaded_form_id_is_aligned_with_the_live_form() {
    let db = Database::open_in_memory().unwrap();
    let engine = MigrationEngine::new(&db, config());
    engine.register(SURVEY, "").unwrap();
    engine.update("Survey", SURVEY2, &survey_decisions()).unwrap();

    let live = SchemaTree::parse(&db.load_schema("Survey", None).unwrap()).unwrap();
    assert_eq!(live.form_id(), "Survey");
    assert_eq!(live.root_name(), "Survey");
    assert!(live.to_xml().unwrap().contains("/Survey/first_name"));
    assert!(!live.to_xml().unwrap().contains("/Survey2/"));

    // Answers in the aligned shape are accepted
    engine.submit("Survey", SURVEY2_ANSWER).unwrap();
}

#[test]
fn generic_root_tag_survives_reuploads() {
    let db = Database::open_in_memory().unwrap();
    let engine = MigrationEngine::new(&db, config());

    let schema = form("data", "Household", "<members/>").replace(r#"<data id="data">"#, r#"<data id="my_form">"#);
    let registered = engine.register(&schema, "").unwrap();
    assert_eq!(registered.id_string, "my_form");

    let outcome = engine.update("my_form", &schema, &Decisions::new()).unwrap();
    assert!(outcome.version.is_none());
    assert_eq!(db.load_schema("my_form", None).unwrap(), schema);
    engine
        .submit("my_form", &answer("data", "11111111-0000-4000-8000-000000000006", "<members>4</members>"))
        .unwrap();

    // Uploaded with its own root tag and id, stored under the live ones
    let renamed = form("household", "Household", "<members/><head/>");
    engine.update("my_form", &renamed, &Decisions::new()).unwrap();
    let live = SchemaTree::parse(&db.load_schema("my_form", None).unwrap()).unwrap();
    assert_eq!(live.root_name(), "data");
    assert_eq!(live.form_id(), "my_form");

    engine
        .submit(
            "my_form",
            &answer("data", "11111111-0000-4000-8000-000000000007", "<members>2</members><head>Ana</head>"),
        )
        .unwrap();
    let tree = answer_tree(&db, "my_form", 0);
    assert_eq!(tree.field_text("members").unwrap(), "4");
    assert!(tree.has_field("head"));
}

#[test]
fn renamed_away_name_reintroduced_later_round_trips() {
    let db = Database::open_in_memory().unwrap();
    let engine = MigrationEngine::new(&db, config());

    let v0 = form("reuse", "v0", "<a/>");
    let v1 = form("reuse", "v1", "<b/>");
    let v2 = form("reuse", "v2", "<b/><a/>");

    let root = engine.register(&v0, "").unwrap().current_version.unwrap();
    engine
        .submit("reuse", &answer("reuse", "11111111-0000-4000-8000-000000000008", "<a>x</a>"))
        .unwrap();
    engine
        .update("reuse", &v1, &Decisions::from_pairs([("determine_b", "a")]).unwrap())
        .unwrap();
    let latest = engine.update("reuse", &v2, &Decisions::new()).unwrap().version.unwrap();

    let tree = answer_tree(&db, "reuse", 0);
    assert_eq!(tree.field_text("b").unwrap(), "x");
    assert_eq!(tree.field_text("a").unwrap(), "");

    let report = engine.restore("reuse", Some(root), false).unwrap();
    assert!(report.changeset.validate().is_ok());
    let tree = answer_tree(&db, "reuse", 0);
    assert_eq!(tree.field_text("a").unwrap(), "x");
    assert!(!tree.has_field("b"));

    let report = engine.restore("reuse", Some(latest), false).unwrap();
    assert!(report.changeset.validate().is_ok());
    let tree = answer_tree(&db, "reuse", 0);
    assert_eq!(tree.field_text("b").unwrap(), "x");
    assert_eq!(tree.field_text("a").unwrap(), "");
    assert_eq!(db.load_schema("reuse", None).unwrap(), v2);
}

#[test]
fn restoring_latest_backup_recovers_form_details() {
    let db = Database::open_in_memory().unwrap();
    let engine = MigrationEngine::new(&db, config());

    let v0 = form("details", "Before", "<a/>");
    let v1 = form("details", "After", "<a/><b/>");
    engine.register(&v0, "first wording").unwrap();
    engine.update("details", &v1, &Decisions::new()).unwrap();
    db.save_form_details("details", "After", Some("second wording")).unwrap();

    engine.restore("details", None, true).unwrap();
    let restored = db.get_form("details").unwrap().unwrap();
    assert_eq!(restored.title, "Before");
    assert_eq!(restored.description, "first wording");
}
