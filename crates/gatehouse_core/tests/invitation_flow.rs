use gatehouse_core::invitation::{
    FIELD_ACCEPTED_AT, FIELD_INVITED_BY_ID, FIELD_TOKEN, MESSAGE_ACCEPTED,
};
use gatehouse_core::{
    default_registry, open_db_in_memory, Changeset, Config, ErrorKind, FieldValue,
    InvitationContext, Params, SqliteUserRepository, User, UserSchema, UserStore, WriteError,
};
use rusqlite::Connection;

fn schema() -> UserSchema {
    let registry = default_registry().expect("default registry");
    UserSchema::define(Config::new(&["invitation"]), &registry).expect("define schema")
}

fn params(entries: &[(&str, &str)]) -> Params {
    entries
        .iter()
        .map(|(field, value)| (field.to_string(), FieldValue::string(*value)))
        .collect()
}

fn insert_inviter(schema: &UserSchema, conn: &Connection) -> User {
    let repo = SqliteUserRepository::new(conn, schema.definition());
    let changeset = schema.changeset(
        Changeset::new(Some(schema.blank_user())),
        &params(&[("email", "inviter@example.com")]),
    );
    repo.insert(changeset).expect("insert inviter")
}

fn token_of(user: &User) -> String {
    user.get(FIELD_TOKEN)
        .as_str()
        .expect("invitation token")
        .to_string()
}

#[test]
fn create_persists_pending_invitation() {
    let schema = schema();
    let conn = open_db_in_memory(schema.definition()).expect("open db");
    let inviter = insert_inviter(&schema, &conn);
    let context = InvitationContext::new(
        &schema,
        SqliteUserRepository::new(&conn, schema.definition()),
    );

    let invited = context
        .create(&inviter, &params(&[("email", "Invitee@Example.com")]))
        .expect("create invitation");

    assert_eq!(invited.get("email"), &FieldValue::string("invitee@example.com"));
    assert_eq!(invited.get(FIELD_INVITED_BY_ID), &FieldValue::Id(inviter.id));
    assert!(!token_of(&invited).is_empty());
    assert!(invited.get(FIELD_ACCEPTED_AT).is_null());

    let stored = context
        .store()
        .get(invited.id)
        .expect("get")
        .expect("stored invitation");
    assert_eq!(stored, invited);
}

#[test]
fn get_by_token_hides_accepted_invitation() {
    let schema = schema();
    let conn = open_db_in_memory(schema.definition()).expect("open db");
    let inviter = insert_inviter(&schema, &conn);
    let context = InvitationContext::new(
        &schema,
        SqliteUserRepository::new(&conn, schema.definition()),
    );

    let invited = context
        .create(&inviter, &params(&[("email", "invitee@example.com")]))
        .expect("create invitation");
    let token = token_of(&invited);

    let first = context.get_by_token(&token).expect("lookup");
    let second = context.get_by_token(&token).expect("lookup");
    assert_eq!(first, second);
    let pending = first.expect("pending invitation");
    assert_eq!(pending.id, invited.id);

    let accepted = context
        .update(pending, &Params::new())
        .expect("accept invitation");
    let accepted_at = accepted
        .get(FIELD_ACCEPTED_AT)
        .as_datetime()
        .expect("accepted_at set");
    assert_eq!(accepted_at % 1000, 0);

    assert_eq!(context.get_by_token(&token).expect("lookup"), None);
    let row = context
        .store()
        .get(invited.id)
        .expect("get")
        .expect("row still stored");
    assert_eq!(row.get(FIELD_ACCEPTED_AT), &FieldValue::UtcDatetime(accepted_at));
}

#[test]
fn get_by_unknown_token_is_none() {
    let schema = schema();
    let conn = open_db_in_memory(schema.definition()).expect("open db");
    let context = InvitationContext::new(
        &schema,
        SqliteUserRepository::new(&conn, schema.definition()),
    );
    assert_eq!(context.get_by_token("missing").expect("lookup"), None);
}

#[test]
fn accepting_twice_is_rejected() {
    let schema = schema();
    let conn = open_db_in_memory(schema.definition()).expect("open db");
    let inviter = insert_inviter(&schema, &conn);
    let context = InvitationContext::new(
        &schema,
        SqliteUserRepository::new(&conn, schema.definition()),
    );

    let invited = context
        .create(&inviter, &params(&[("email", "invitee@example.com")]))
        .expect("create invitation");
    let accepted = context
        .update(invited, &Params::new())
        .expect("first accept");

    let err = context
        .update(accepted, &Params::new())
        .expect_err("second accept must fail");
    let changeset = err.changeset().expect("changeset error");
    assert_eq!(changeset.errors_on(FIELD_ACCEPTED_AT)[0].kind, ErrorKind::Invalid);
}

#[test]
fn accept_can_change_identity_field() {
    let schema = schema();
    let conn = open_db_in_memory(schema.definition()).expect("open db");
    let inviter = insert_inviter(&schema, &conn);
    let context = InvitationContext::new(
        &schema,
        SqliteUserRepository::new(&conn, schema.definition()),
    );

    let invited = context
        .create(&inviter, &params(&[("email", "invitee@example.com")]))
        .expect("create invitation");
    let accepted = context
        .update(invited, &params(&[("email", "renamed@example.com")]))
        .expect("accept");

    let stored = context
        .store()
        .get(accepted.id)
        .expect("get")
        .expect("stored");
    assert_eq!(stored.get("email"), &FieldValue::string("renamed@example.com"));
}

#[test]
fn invalid_email_is_not_persisted() {
    let schema = schema();
    let conn = open_db_in_memory(schema.definition()).expect("open db");
    let inviter = insert_inviter(&schema, &conn);
    let context = InvitationContext::new(
        &schema,
        SqliteUserRepository::new(&conn, schema.definition()),
    );

    let err = context
        .create(&inviter, &params(&[("email", "not-an-email")]))
        .expect_err("invalid email must fail");
    let changeset = err.changeset().expect("changeset error");
    assert_eq!(changeset.errors_on("email")[0].kind, ErrorKind::Format);

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM users;", [], |row| row.get(0))
        .expect("count users");
    assert_eq!(count, 1);
}

#[test]
fn token_collision_surfaces_as_changeset_error() {
    let schema = schema();
    let conn = open_db_in_memory(schema.definition()).expect("open db");
    let inviter = insert_inviter(&schema, &conn);
    let context = InvitationContext::new(
        &schema,
        SqliteUserRepository::new(&conn, schema.definition()),
    );

    context
        .create(
            &inviter,
            &params(&[("email", "a@example.com"), (FIELD_TOKEN, "shared-token")]),
        )
        .expect("first invitation");
    let err = context
        .create(
            &inviter,
            &params(&[("email", "b@example.com"), (FIELD_TOKEN, "shared-token")]),
        )
        .expect_err("colliding token must fail");

    let changeset = err.changeset().expect("changeset error");
    let token_errors = changeset.errors_on(FIELD_TOKEN);
    assert_eq!(token_errors.len(), 1);
    assert_eq!(token_errors[0].kind, ErrorKind::Unique);
    assert_eq!(token_errors[0].message, "has already been taken");
}

#[test]
fn duplicate_email_surfaces_as_changeset_error() {
    let schema = schema();
    let conn = open_db_in_memory(schema.definition()).expect("open db");
    let inviter = insert_inviter(&schema, &conn);
    let context = InvitationContext::new(
        &schema,
        SqliteUserRepository::new(&conn, schema.definition()),
    );

    let err = context
        .create(&inviter, &params(&[("email", "inviter@example.com")]))
        .expect_err("duplicate email must fail");
    assert!(matches!(err, WriteError::Invalid(_)));
    assert_eq!(
        err.changeset().expect("changeset").errors_on("email")[0].kind,
        ErrorKind::Unique
    );
}

#[test]
fn stale_pending_copy_cannot_accept_again() {
    let schema = schema();
    let conn = open_db_in_memory(schema.definition()).expect("open db");
    let inviter = insert_inviter(&schema, &conn);
    let context = InvitationContext::new(
        &schema,
        SqliteUserRepository::new(&conn, schema.definition()),
    );

    let invited = context
        .create(&inviter, &params(&[("email", "invitee@example.com")]))
        .expect("create invitation");
    let token = token_of(&invited);
    let first_copy = context
        .get_by_token(&token)
        .expect("lookup")
        .expect("pending invitation");
    let second_copy = context
        .get_by_token(&token)
        .expect("lookup")
        .expect("pending invitation");

    let accepted = context
        .update(first_copy, &Params::new())
        .expect("first accept");
    let err = context
        .update(second_copy, &Params::new())
        .expect_err("stale copy must not accept");

    let changeset = err.changeset().expect("changeset error");
    let errors = changeset.errors_on(FIELD_ACCEPTED_AT);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ErrorKind::Invalid);
    assert_eq!(errors[0].message, MESSAGE_ACCEPTED);

    let stored = context
        .store()
        .get(invited.id)
        .expect("get")
        .expect("stored");
    assert_eq!(
        stored.get(FIELD_ACCEPTED_AT),
        accepted.get(FIELD_ACCEPTED_AT)
    );
}

#[test]
fn updating_deleted_user_is_not_found() {
    let schema = schema();
    let conn = open_db_in_memory(schema.definition()).expect("open db");
    let inviter = insert_inviter(&schema, &conn);
    let context = InvitationContext::new(
        &schema,
        SqliteUserRepository::new(&conn, schema.definition()),
    );

    let invited = context
        .create(&inviter, &params(&[("email", "invitee@example.com")]))
        .expect("create invitation");
    conn.execute("DELETE FROM users WHERE id = ?1;", [invited.id.to_string()])
        .expect("delete row");

    let err = context
        .update(invited, &Params::new())
        .expect_err("missing row must fail");
    assert!(matches!(
        err,
        WriteError::Repo(gatehouse_core::RepoError::NotFound(_))
    ));
}
