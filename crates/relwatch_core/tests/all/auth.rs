use relwatch_core::auth::AuthService;

use crate::helpers::test_store;

fn service(store: &relwatch_core::store::Store) -> AuthService {
    AuthService::new(store.clone(), Some("integration-test-secret".to_string()))
}

#[tokio::test]
async fn login_issues_a_pair_that_authenticates() {
    let ts = test_store().await;
    let auth = service(&ts.store);
    auth.ensure_admin_user().await.unwrap();

    let (user, pair) = auth.login("admin", "admin", None).await.unwrap();
    assert_eq!(user.username, "admin");
    assert_eq!(pair.token_type, "bearer");

    let me = auth.current_user(&pair.access_token).await.unwrap();
    assert_eq!(me.username, "admin");
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let ts = test_store().await;
    let auth = service(&ts.store);
    auth.ensure_admin_user().await.unwrap();

    assert!(auth.login("admin", "nope", None).await.is_err());
    assert!(auth.login("nobody", "admin", None).await.is_err());
}

#[tokio::test]
async fn logout_kills_the_session_before_token_expiry() {
    let ts = test_store().await;
    let auth = service(&ts.store);
    auth.ensure_admin_user().await.unwrap();

    let (_, pair) = auth.login("admin", "admin", None).await.unwrap();
    auth.logout(&pair.access_token).await.unwrap();

    // The JWT is still within its lifetime, but its session row is gone.
    assert!(auth.current_user(&pair.access_token).await.is_err());
}

#[tokio::test]
async fn refresh_token_cannot_be_used_as_access_token() {
    let ts = test_store().await;
    let auth = service(&ts.store);
    auth.ensure_admin_user().await.unwrap();

    let (_, pair) = auth.login("admin", "admin", None).await.unwrap();
    assert!(auth.current_user(&pair.refresh_token).await.is_err());

    let renewed = auth.refresh(&pair.refresh_token).await.unwrap();
    assert!(auth.current_user(&renewed.access_token).await.is_ok());
}

#[tokio::test]
async fn registration_rejects_duplicates_and_changes_password() {
    let ts = test_store().await;
    let auth = service(&ts.store);

    let user = auth.register("op", "op@example.com", "first").await.unwrap();
    assert!(auth.register("op", "other@example.com", "x").await.is_err());

    auth.change_password(&user, "first", "second").await.unwrap();
    assert!(auth.login("op", "first", None).await.is_err());
    assert!(auth.login("op", "second", None).await.is_ok());
}

#[tokio::test]
async fn tokens_from_another_secret_are_rejected() {
    let ts = test_store().await;
    let auth = service(&ts.store);
    auth.ensure_admin_user().await.unwrap();
    let (_, pair) = auth.login("admin", "admin", None).await.unwrap();

    let other = AuthService::new(ts.store.clone(), Some("different-secret".to_string()));
    assert!(other.current_user(&pair.access_token).await.is_err());
}
