//! Query-layer behavior against the in-memory executor: write policies,
//! soft deletes, demanded lookups, hooks, and aggregates.

use std::sync::{Arc, Mutex};

use serde_json::json;
use sqlom::{
    ChangeKind, EntityField, JoinKind, MemoryExecutor, OrmError, Query, Row, SqlValue, SqlomEntity,
};

#[derive(Debug, Clone, SqlomEntity)]
#[sqlom(table = "accounts")]
#[allow(dead_code)]
struct Account {
    #[sqlom(primary)]
    id: Option<i64>,
    #[sqlom(filter(trim))]
    name: String,
    score: f64,
    active: bool,
    #[sqlom(readonly)]
    invite: Option<String>,
    #[sqlom(created_at)]
    created_at: Option<i64>,
    #[sqlom(updated_at)]
    updated_at: Option<i64>,
    #[sqlom(soft_delete)]
    deleted_at: Option<i64>,
}

#[derive(Debug, Clone, SqlomEntity)]
#[sqlom(table = "profiles")]
#[allow(dead_code)]
struct Profile {
    #[sqlom(primary)]
    id: Option<i64>,
    account_id: i64,
    bio: String,
}

fn setup() -> MemoryExecutor {
    let _ = env_logger::builder().is_test(true).try_init();
    MemoryExecutor::new()
}

fn data(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    value.as_object().cloned().unwrap()
}

fn row(pairs: &[(&str, SqlValue)]) -> Row {
    pairs
        .iter()
        .map(|(column, value)| (column.to_string(), value.clone()))
        .collect()
}

fn seed_account(exec: &mut MemoryExecutor, name: &str, score: f64) -> i64 {
    let outcome = Query::<Account>::new(exec)
        .insert(data(json!({ "name": name, "score": score, "active": true })))
        .unwrap();
    outcome.last_insert_id.unwrap()
}

#[test]
fn insert_fills_timestamps_and_soft_delete_default() {
    let mut exec = setup();
    let outcome = Query::<Account>::new(&mut exec)
        .insert(data(json!({ "name": "Ann", "score": 1.5, "active": true })))
        .unwrap();
    assert_eq!(outcome.last_insert_id, Some(1));

    let stored = &exec.rows("accounts")[0];
    assert_eq!(stored.get("name"), Some(&SqlValue::Text("Ann".into())));
    assert_eq!(stored.get("score"), Some(&SqlValue::Float(1.5)));
    // Booleans hit storage as 0/1 integers.
    assert_eq!(stored.get("active"), Some(&SqlValue::Int(1)));
    assert_eq!(stored.get("deleted_at"), Some(&SqlValue::Int(0)));
    let Some(SqlValue::Int(created)) = stored.get("created_at") else {
        panic!("created_at missing");
    };
    assert!(*created > 1_600_000_000);
    assert!(stored.get("updated_at").is_some());
}

#[test]
fn insert_keeps_explicit_timestamps() {
    let mut exec = setup();
    Query::<Account>::new(&mut exec)
        .insert(data(json!({
            "name": "Ann",
            "score": 0.0,
            "active": false,
            "created_at": 123
        })))
        .unwrap();
    let stored = &exec.rows("accounts")[0];
    assert_eq!(stored.get("created_at"), Some(&SqlValue::Int(123)));
}

#[test]
fn unknown_keys_never_reach_storage() {
    let mut exec = setup();
    Query::<Account>::new(&mut exec)
        .insert(data(json!({ "name": "Ann", "score": 1.0, "active": true, "is_admin": true })))
        .unwrap();
    assert!(!exec.rows("accounts")[0].contains_key("is_admin"));

    let err = Query::<Account>::new(&mut exec)
        .insert(data(json!({ "is_admin": true })))
        .unwrap_err();
    assert!(matches!(err, OrmError::InvalidRequest { .. }));
}

#[test]
fn staged_data_wins_over_call_data() {
    let mut exec = setup();
    Query::<Account>::new(&mut exec)
        .data(data(json!({ "name": "Staged" })))
        .insert(data(json!({ "name": "Arg", "score": 1.0, "active": true })))
        .unwrap();
    assert_eq!(
        exec.rows("accounts")[0].get("name"),
        Some(&SqlValue::Text("Staged".into()))
    );
}

#[test]
fn update_strips_readonly_members() {
    let mut exec = setup();
    Query::<Account>::new(&mut exec)
        .insert(data(json!({ "name": "Ann", "score": 1.0, "active": true, "invite": "ABC" })))
        .unwrap();

    let affected = Query::<Account>::new(&mut exec)
        .where_field(AccountField::Id.handle().eq(1))
        .update(data(json!({ "invite": "XYZ", "score": 2.0 })))
        .unwrap();
    assert_eq!(affected, 1);

    let stored = &exec.rows("accounts")[0];
    assert_eq!(stored.get("invite"), Some(&SqlValue::Text("ABC".into())));
    assert_eq!(stored.get("score"), Some(&SqlValue::Float(2.0)));
}

#[test]
fn delete_writes_a_tombstone_and_reads_filter_it() {
    let mut exec = setup();
    seed_account(&mut exec, "Ann", 1.0);
    seed_account(&mut exec, "Bo", 2.0);

    let affected = Query::<Account>::new(&mut exec)
        .where_field(AccountField::Id.handle().eq(1))
        .delete()
        .unwrap();
    assert_eq!(affected, 1);

    // Physically still there, tombstoned.
    assert_eq!(exec.rows("accounts").len(), 2);
    let Some(SqlValue::Int(tombstone)) = exec.rows("accounts")[0].get("deleted_at") else {
        panic!("deleted_at missing");
    };
    assert!(*tombstone > 0);

    let mut query = Query::<Account>::new(&mut exec);
    let live = query.select().unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].get(AccountField::Name), Some(&json!("Bo")));

    let all = query.with_deleted().select().unwrap();
    assert_eq!(all.len(), 2);
}

#[test]
fn force_delete_removes_rows_physically() {
    let mut exec = setup();
    seed_account(&mut exec, "Ann", 1.0);
    let affected = Query::<Account>::new(&mut exec)
        .where_field(AccountField::Id.handle().eq(1))
        .force_delete()
        .unwrap();
    assert_eq!(affected, 1);
    assert!(exec.rows("accounts").is_empty());
}

#[test]
fn find_hydrates_and_demanded_lookups_carry_entity_names() {
    let mut exec = setup();
    seed_account(&mut exec, "Ann", 1.0);

    let mut query = Query::<Account>::new(&mut exec);
    let found = query.find(1).unwrap().unwrap();
    assert_eq!(found.get(AccountField::Name), Some(&json!("Ann")));
    assert_eq!(found.get(AccountField::Active), Some(&json!(true)));

    let err = query.find_or_fail(999).unwrap_err();
    let OrmError::NotFound { entity, message } = err else {
        panic!("expected not-found");
    };
    assert_eq!(entity, "Account");
    assert_eq!(message, "Account not found");

    let err = query
        .not_found_message("no such account")
        .find_or_fail(999)
        .unwrap_err();
    let OrmError::NotFound { message, .. } = err else {
        panic!("expected not-found");
    };
    assert_eq!(message, "no such account");
}

#[test]
fn select_or_fail_rejects_empty_results() {
    let mut exec = setup();
    let err = Query::<Account>::new(&mut exec).select_or_fail().unwrap_err();
    let OrmError::NotFound { message, .. } = err else {
        panic!("expected not-found");
    };
    assert_eq!(message, "no Account records found");
}

#[test]
fn hooks_observe_writes_and_their_failures_are_swallowed() {
    let mut exec = setup();
    let seen: Arc<Mutex<Vec<(ChangeKind, Option<SqlValue>)>>> = Arc::new(Mutex::new(Vec::new()));

    let events = Arc::clone(&seen);
    let mut query = Query::<Account>::new(&mut exec);
    query.on_change(move |event| {
        events.lock().unwrap().push((event.kind, event.primary.clone()));
        Err(OrmError::executor("hook boom"))
    });

    query
        .insert(data(json!({ "name": "Ann", "score": 1.0, "active": true })))
        .unwrap();
    query
        .where_field(AccountField::Id.handle().eq(1))
        .delete()
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], (ChangeKind::Insert, Some(SqlValue::Int(1))));
    assert_eq!(seen[1].0, ChangeKind::Delete);
    assert_eq!(seen[1].1, Some(SqlValue::Int(1)));
}

#[test]
fn hooks_fire_generic_then_write_then_operation_tiers() {
    let mut exec = setup();
    let seen: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let mut query = Query::<Account>::new(&mut exec);
    // Registered in reverse tier order on purpose.
    let events = Arc::clone(&seen);
    query.on_insert(move |_| {
        events.lock().unwrap().push("insert");
        Ok(())
    });
    let events = Arc::clone(&seen);
    query.on_write(move |_| {
        events.lock().unwrap().push("write");
        Ok(())
    });
    let events = Arc::clone(&seen);
    query.on_change(move |_| {
        events.lock().unwrap().push("change");
        Ok(())
    });

    query
        .insert(data(json!({ "name": "Ann", "score": 1.0, "active": true })))
        .unwrap();
    assert_eq!(*seen.lock().unwrap(), vec!["change", "write", "insert"]);

    seen.lock().unwrap().clear();
    query
        .where_field(AccountField::Id.handle().eq(1))
        .delete()
        .unwrap();
    // Deletes skip the write tier and the insert hook.
    assert_eq!(*seen.lock().unwrap(), vec!["change"]);
}

#[test]
fn aggregates_run_over_the_filtered_set() {
    let mut exec = setup();
    seed_account(&mut exec, "Ann", 1.0);
    seed_account(&mut exec, "Bo", 2.0);
    seed_account(&mut exec, "Cy", 3.0);

    let mut query = Query::<Account>::new(&mut exec);
    assert_eq!(query.count().unwrap(), 3);
    assert_eq!(query.sum(AccountField::Score.handle()).unwrap(), 6.0);
    assert_eq!(query.avg(AccountField::Score.handle()).unwrap(), Some(2.0));
    assert_eq!(
        query.max(AccountField::Score.handle()).unwrap(),
        Some(SqlValue::Int(3))
    );

    query.where_field(AccountField::Score.handle().ge(2));
    assert_eq!(query.count().unwrap(), 2);
}

#[test]
fn joined_rows_extend_into_a_second_entity() {
    let mut exec = setup();
    seed_account(&mut exec, "Ann", 1.0);
    exec.seed(
        "profiles",
        vec![row(&[
            ("id", SqlValue::Int(10)),
            ("account_id", SqlValue::Int(1)),
            ("bio", SqlValue::Text("hi".into())),
        ])],
    );

    let mut query = Query::<Account>::new(&mut exec);
    query.join(
        JoinKind::Inner,
        "profiles",
        ProfileField::AccountId.handle().eq_field(AccountField::Id.handle()),
    );
    let pairs = query.select_extend::<Profile>().unwrap();
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].0.get(AccountField::Name), Some(&json!("Ann")));
    assert_eq!(pairs[0].1.get(ProfileField::Bio), Some(&json!("hi")));
    assert_eq!(pairs[0].1.get(ProfileField::AccountId), Some(&json!(1)));
}

#[test]
fn raw_conditions_surface_executor_errors() {
    let mut exec = setup();
    seed_account(&mut exec, "Ann", 1.0);
    let err = Query::<Account>::new(&mut exec)
        .where_field(AccountField::Name.handle().eq("name").raw())
        .select()
        .unwrap_err();
    assert!(matches!(err, OrmError::Executor { .. }));
}
