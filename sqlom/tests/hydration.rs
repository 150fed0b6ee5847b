//! Record hydration and serialization: raw rows in, shaped maps out.

use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlom::{OrmError, Record, Row, SqlValue, SqlomEntity, WriteValue};

#[derive(Debug, Clone, Serialize, Deserialize, SqlomEntity)]
#[sqlom(
    table = "users",
    scene(name = "public", hide(secret), rename(name = "display_name"))
)]
struct User {
    #[sqlom(primary)]
    id: Option<i64>,
    #[sqlom(column = "user_name", filter(trim), validate(length(min = 1, max = 50)))]
    name: String,
    #[sqlom(validate(email, message = "give a real address"))]
    email: Option<String>,
    secret: Option<String>,
    tags: Option<Vec<String>>,
    #[sqlom(array = "legacy")]
    flags: Option<Vec<i64>>,
    #[sqlom(created_at)]
    created_at: Option<i64>,
}

fn row(pairs: &[(&str, SqlValue)]) -> Row {
    pairs
        .iter()
        .map(|(column, value)| (column.to_string(), value.clone()))
        .collect()
}

fn data(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    value.as_object().cloned().unwrap()
}

#[test]
fn raw_row_hydrates_into_typed_members() {
    let record = Record::<User>::parse(&row(&[
        ("id", SqlValue::Text("5".into())),
        ("user_name", SqlValue::Text("Ann".into())),
        ("created_at", SqlValue::Text("1690000000".into())),
        ("mystery", SqlValue::Text("?".into())),
    ]))
    .unwrap();

    assert_eq!(record.get(UserField::Id), Some(&json!(5)));
    assert_eq!(record.get(UserField::Name), Some(&json!("Ann")));
    assert_eq!(record.get(UserField::CreatedAt), Some(&json!(1690000000)));
    // Unknown columns become untracked extras, never errors.
    assert_eq!(record.value_of("mystery"), Some(&json!("?")));
}

#[test]
fn retain_shapes_the_storage_map() {
    let mut record = Record::<User>::parse(&row(&[
        ("id", SqlValue::Text("5".into())),
        ("user_name", SqlValue::Text("Ann".into())),
        ("created_at", SqlValue::Text("1690000000".into())),
    ]))
    .unwrap();

    record.retain(["name"]);
    let storage = record.storage_map().unwrap();
    assert_eq!(
        storage,
        vec![("user_name".to_string(), WriteValue::Value(SqlValue::Text("Ann".into())))]
    );
}

#[test]
fn exclude_then_retain_last_one_wins() {
    let mut record = Record::<User>::parse(&row(&[
        ("id", SqlValue::Int(1)),
        ("user_name", SqlValue::Text("Ann".into())),
    ]))
    .unwrap();

    record.exclude(["name"]);
    record.retain(["name"]);
    let map = record.to_map();
    assert_eq!(map.len(), 1);
    assert_eq!(map.get("name"), Some(&json!("Ann")));
}

#[test]
fn scene_hides_and_renames_for_display_only() {
    let mut record = Record::<User>::init(data(json!({
        "name": "Ann",
        "secret": "s3cret"
    })))
    .unwrap();

    record.scene("public");
    let map = record.to_map();
    assert_eq!(map.get("display_name"), Some(&json!("Ann")));
    assert!(!map.contains_key("secret"));
    assert!(!map.contains_key("name"));

    // The storage map ignores scenes entirely.
    let storage = record.storage_map().unwrap();
    assert!(storage.iter().any(|(column, _)| column == "secret"));
    assert!(storage.iter().any(|(column, _)| column == "user_name"));
}

#[test]
fn json_arrays_survive_the_round_trip() {
    let record = Record::<User>::init(data(json!({
        "name": "Ann",
        "tags": ["a", "b"]
    })))
    .unwrap();
    assert_eq!(record.get(UserField::Tags), Some(&json!(["a", "b"])));

    let storage = record.storage_map().unwrap();
    let tags = storage.iter().find(|(column, _)| column == "tags").unwrap();
    assert_eq!(tags.1, WriteValue::Value(SqlValue::Text("[\"a\",\"b\"]".into())));

    let rehydrated = Record::<User>::parse(&row(&[
        ("user_name", SqlValue::Text("Ann".into())),
        ("tags", SqlValue::Text("[\"a\",\"b\"]".into())),
    ]))
    .unwrap();
    assert_eq!(rehydrated.get(UserField::Tags), Some(&json!(["a", "b"])));
}

#[test]
fn legacy_encoded_columns_decode() {
    let record = Record::<User>::parse(&row(&[(
        "flags",
        SqlValue::Text("a:2:{i:0;i:1;i:1;i:2;}".into()),
    )]))
    .unwrap();
    assert_eq!(record.get(UserField::Flags), Some(&json!([1, 2])));
}

#[test]
fn init_runs_validation_with_declared_messages() {
    let err = Record::<User>::init(data(json!({
        "name": "Ann",
        "email": "not-an-address"
    })))
    .unwrap_err();

    let OrmError::Validation(validation) = err else {
        panic!("expected a validation error");
    };
    assert_eq!(validation.issues.len(), 1);
    assert_eq!(validation.issues[0].field, "email");
    assert_eq!(validation.issues[0].message, "give a real address");
}

#[test]
fn set_reruns_the_full_pipeline() {
    let mut record = Record::<User>::init(data(json!({ "name": "Ann" }))).unwrap();

    record.set(UserField::Name, "  Bo  ").unwrap();
    assert_eq!(record.get(UserField::Name), Some(&json!("Bo")));

    // Whitespace trims to an empty string, failing the length rule.
    let err = record.set(UserField::Name, "   ").unwrap_err();
    assert!(matches!(err, OrmError::Validation(_)));
    assert_eq!(record.get(UserField::Name), Some(&json!("Bo")));
}

#[test]
fn records_convert_to_and_from_entities() {
    let user = User {
        id: Some(7),
        name: "Ann".to_string(),
        email: Some("ann@example.com".to_string()),
        secret: None,
        tags: Some(vec!["a".to_string()]),
        flags: None,
        created_at: Some(1690000000),
    };

    let record = Record::from_entity(&user).unwrap();
    assert_eq!(record.get(UserField::Id), Some(&json!(7)));

    let back: User = record.to_entity().unwrap();
    assert_eq!(back.name, "Ann");
    assert_eq!(back.tags, Some(vec!["a".to_string()]));
}
