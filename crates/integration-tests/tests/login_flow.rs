//! Integration tests for login reconciliation, the write fallback chain and
//! profile refresh.

#![allow(clippy::unwrap_used)]

use zalo_shop_integration_tests::{FakeHost, Harness, MemoryProfileTable, StaticVerifier, user};
use zalo_shop_storefront::models::{FieldUpdate, PartialProfile, ProfileFields, UserProfile};
use zalo_shop_storefront::services::profile::ReconcileError;
use zalo_shop_storefront::services::session::{
    MemorySessionStorage, PersistedSession, SessionState, StoreEvent,
};

fn stored(id: &str) -> UserProfile {
    UserProfile {
        id: user(id),
        name: Some("Old Name".to_string()),
        avatar: Some("https://avatar.zalo.me/old.jpg".to_string()),
        phone: Some("0900000000".to_string()),
        default_address: Some("1 Nguyễn Huệ, Quận 1".to_string()),
        updated_at: None,
    }
}

// =============================================================================
// Login
// =============================================================================

#[tokio::test]
async fn test_first_login_creates_profile_via_upsert() {
    let h = Harness::builder(FakeHost::user("1001", "Lan").with_phone("0901234567")).build();

    let profile = h.state.profiles().login().await.unwrap();

    assert_eq!(profile.id, user("1001"));
    assert_eq!(profile.name.as_deref(), Some("Lan"));
    assert_eq!(profile.phone.as_deref(), Some("0901234567"));
    assert!(profile.updated_at.is_some());

    // No function in the database and no row yet: every strategy ran
    assert_eq!(*h.profiles.calls.lock().unwrap(), vec!["rpc", "update", "upsert"]);
    assert_eq!(
        h.state.session().state(),
        SessionState::Authenticated {
            user_id: user("1001")
        }
    );
    assert_eq!(
        h.persisted(),
        PersistedSession {
            logged_in: true,
            user_id: Some(user("1001")),
        }
    );
}

#[tokio::test]
async fn test_login_uses_rpc_when_available() {
    let profiles = MemoryProfileTable::default();
    *profiles.rpc_supported.lock().unwrap() = true;
    let h = Harness::builder(FakeHost::user("1001", "Lan"))
        .profiles(profiles)
        .build();

    h.state.profiles().login().await.unwrap();

    assert_eq!(*h.profiles.calls.lock().unwrap(), vec!["rpc"]);
}

#[tokio::test]
async fn test_verified_profile_beats_host_data() {
    let verified = PartialProfile {
        name: Some("Nguyễn Thị Lan".to_string()),
        default_address: Some("12 Lê Lợi, Quận 1".to_string()),
        ..PartialProfile::default()
    };
    let h = Harness::builder(FakeHost::user("1001", "Lan").with_token("tok-1"))
        .verifier(StaticVerifier::answering(verified))
        .build();

    let profile = h.state.profiles().login().await.unwrap();

    assert_eq!(profile.name.as_deref(), Some("Nguyễn Thị Lan"));
    assert_eq!(profile.default_address.as_deref(), Some("12 Lê Lợi, Quận 1"));
    // Avatar had no verified contribution, so the host's wins
    assert_eq!(
        profile.avatar.as_deref(),
        Some("https://avatar.zalo.me/1001.jpg")
    );
}

#[tokio::test]
async fn test_rejected_verification_falls_back_to_host_data() {
    let h = Harness::builder(FakeHost::user("1001", "Lan").with_token("tok-1"))
        .verifier(StaticVerifier::rejecting())
        .build();

    let profile = h.state.profiles().login().await.unwrap();
    assert_eq!(profile.name.as_deref(), Some("Lan"));
}

#[tokio::test]
async fn test_declined_info_preserves_stored_fields() {
    let profiles = MemoryProfileTable::default();
    profiles.insert(stored("1001"));
    let h = Harness::builder(FakeHost::declined_info("1001"))
        .profiles(profiles)
        .build();

    let profile = h.state.profiles().login().await.unwrap();

    // Nothing contributed, nothing overwritten
    assert_eq!(profile.name.as_deref(), Some("Old Name"));
    assert_eq!(profile.phone.as_deref(), Some("0900000000"));
    assert_eq!(profile.default_address.as_deref(), Some("1 Nguyễn Huệ, Quận 1"));
    assert!(h.state.session().current_user().is_some());
}

#[tokio::test]
async fn test_live_data_overwrites_stored_fields() {
    let profiles = MemoryProfileTable::default();
    profiles.insert(stored("1001"));
    let h = Harness::builder(FakeHost::user("1001", "Lan"))
        .profiles(profiles)
        .build();

    let profile = h.state.profiles().login().await.unwrap();

    assert_eq!(profile.name.as_deref(), Some("Lan"));
    // Phone declined: the stored one survives
    assert_eq!(profile.phone.as_deref(), Some("0900000000"));
    assert_eq!(*h.profiles.calls.lock().unwrap(), vec!["rpc", "update"]);
}

#[tokio::test]
async fn test_no_identity_fails_without_writes() {
    let h = Harness::builder(FakeHost::default()).build();

    let err = h.state.profiles().login().await.unwrap_err();

    assert!(matches!(err, ReconcileError::Identity(_)));
    assert_eq!(h.profiles.writes(), 0);
    assert!(matches!(h.state.session().state(), SessionState::Failed { .. }));
    assert_eq!(h.persisted(), PersistedSession::default());
}

#[tokio::test]
async fn test_failed_write_does_not_authenticate() {
    let profiles = MemoryProfileTable::default();
    *profiles.fail_upsert.lock().unwrap() = true;
    let h = Harness::builder(FakeHost::user("1001", "Lan"))
        .profiles(profiles)
        .build();

    let err = h.state.profiles().login().await.unwrap_err();

    assert!(matches!(err, ReconcileError::Profile(_)));
    assert!(err.to_string().contains("rpc -> update -> upsert"));
    assert!(h.state.session().current_user().is_none());
    assert!(!h.persisted().logged_in);

    // A retry after the database recovers succeeds
    *h.profiles.fail_upsert.lock().unwrap() = false;
    h.state.profiles().login().await.unwrap();
    assert!(h.persisted().logged_in);
}

#[tokio::test]
async fn test_login_while_authenticated_is_rejected() {
    let h = Harness::builder(FakeHost::user("1001", "Lan")).build();
    h.state.profiles().login().await.unwrap();

    let err = h.state.profiles().login().await.unwrap_err();
    assert!(matches!(err, ReconcileError::Session(_)));
    assert!(h.state.session().current_user().is_some());
}

// =============================================================================
// Refresh
// =============================================================================

#[tokio::test]
async fn test_refresh_anonymous_is_none() {
    let h = Harness::builder(FakeHost::user("1001", "Lan")).build();
    assert_eq!(h.state.profiles().refresh().await.unwrap(), None);
    assert_eq!(h.host.identity_calls(), 0);
}

#[tokio::test]
async fn test_refresh_complete_profile_skips_host() {
    let profiles = MemoryProfileTable::default();
    profiles.insert(stored("1001"));
    let h = Harness::builder(FakeHost::user("1001", "Lan"))
        .profiles(profiles)
        .storage(MemorySessionStorage::with(PersistedSession {
            logged_in: true,
            user_id: Some(user("1001")),
        }))
        .build();

    let profile = h.state.profiles().refresh().await.unwrap().unwrap();

    assert_eq!(profile.name.as_deref(), Some("Old Name"));
    assert_eq!(h.host.identity_calls(), 0);
    assert_eq!(h.profiles.writes(), 0);
}

#[tokio::test]
async fn test_refresh_backfills_missing_fields() {
    let profiles = MemoryProfileTable::default();
    profiles.insert(UserProfile {
        phone: None,
        ..stored("1001")
    });
    let h = Harness::builder(FakeHost::user("1001", "Lan").with_phone("0901234567"))
        .profiles(profiles)
        .storage(MemorySessionStorage::with(PersistedSession {
            logged_in: true,
            user_id: Some(user("1001")),
        }))
        .build();

    let profile = h.state.profiles().refresh().await.unwrap().unwrap();

    assert_eq!(profile.phone.as_deref(), Some("0901234567"));
    assert_eq!(h.host.identity_calls(), 1);
    // Refresh never changes the session
    assert_eq!(h.state.session().current_user(), Some(user("1001")));
}

#[tokio::test]
async fn test_refresh_serves_stale_profile_when_backfill_fails() {
    let profiles = MemoryProfileTable::default();
    profiles.insert(UserProfile {
        avatar: None,
        ..stored("1001")
    });
    *profiles.fail_update.lock().unwrap() = true;
    *profiles.fail_upsert.lock().unwrap() = true;
    let h = Harness::builder(FakeHost::user("1001", "Lan"))
        .profiles(profiles)
        .storage(MemorySessionStorage::with(PersistedSession {
            logged_in: true,
            user_id: Some(user("1001")),
        }))
        .build();

    let profile = h.state.profiles().refresh().await.unwrap().unwrap();

    assert_eq!(profile.name.as_deref(), Some("Old Name"));
    assert_eq!(profile.avatar, None);
}

#[tokio::test]
async fn test_refresh_never_writes_another_host_account() {
    let profiles = MemoryProfileTable::default();
    profiles.insert(UserProfile {
        phone: None,
        ..stored("1001")
    });
    // The host now reports a different account than the session holds
    let h = Harness::builder(FakeHost::user("2002", "Mai").with_phone("0909999999"))
        .profiles(profiles)
        .storage(MemorySessionStorage::with(PersistedSession {
            logged_in: true,
            user_id: Some(user("1001")),
        }))
        .build();

    let profile = h.state.profiles().refresh().await.unwrap().unwrap();

    assert_eq!(profile.id, user("1001"));
    assert_eq!(profile.phone, None);
    assert_eq!(h.profiles.writes(), 0);
    assert!(h.profiles.get(&user("2002")).is_none());
    assert_eq!(h.state.session().current_user(), Some(user("1001")));
}

#[tokio::test]
async fn test_refresh_with_other_host_account_and_no_row_fails() {
    let h = Harness::builder(FakeHost::user("2002", "Mai"))
        .storage(MemorySessionStorage::with(PersistedSession {
            logged_in: true,
            user_id: Some(user("1001")),
        }))
        .build();

    let result = h.state.profiles().refresh().await;

    assert!(matches!(
        result,
        Err(ReconcileError::IdentityChanged { ref session_user, ref host_user })
            if *session_user == user("1001") && *host_user == user("2002")
    ));
    assert_eq!(h.profiles.writes(), 0);
    assert_eq!(h.state.profiles().current_profile().await, None);
}

#[tokio::test]
async fn test_refresh_fails_when_nothing_is_known() {
    let profiles = MemoryProfileTable::default();
    *profiles.fail_fetch.lock().unwrap() = true;
    let h = Harness::builder(FakeHost::user("1001", "Lan"))
        .profiles(profiles)
        .storage(MemorySessionStorage::with(PersistedSession {
            logged_in: true,
            user_id: Some(user("1001")),
        }))
        .build();

    assert!(matches!(
        h.state.profiles().refresh().await,
        Err(ReconcileError::Profile(_))
    ));
}

#[tokio::test]
async fn test_refresh_fetch_failure_serves_cached_profile() {
    let h = Harness::builder(FakeHost::user("1001", "Lan")).build();
    h.state.profiles().login().await.unwrap();

    *h.profiles.fail_fetch.lock().unwrap() = true;
    let profile = h.state.profiles().refresh().await.unwrap().unwrap();
    assert_eq!(profile.name.as_deref(), Some("Lan"));
}

// =============================================================================
// Profile edits
// =============================================================================

#[tokio::test]
async fn test_update_profile_publishes_event() {
    let h = Harness::builder(FakeHost::user("1001", "Lan")).build();
    h.state.profiles().login().await.unwrap();
    let mut events = h.state.session().subscribe();

    let fields = ProfileFields {
        default_address: FieldUpdate::set("99 Trần Hưng Đạo"),
        ..ProfileFields::default()
    };
    let profile = h.state.profiles().update_profile(fields).await.unwrap();

    assert_eq!(profile.default_address.as_deref(), Some("99 Trần Hưng Đạo"));
    assert_eq!(profile.name.as_deref(), Some("Lan"));
    assert_eq!(
        events.recv().await.unwrap(),
        StoreEvent::ProfileUpdated {
            user_id: user("1001")
        }
    );
    assert_eq!(h.state.profiles().current_profile().await, Some(profile));
}

#[tokio::test]
async fn test_update_profile_requires_login() {
    let h = Harness::builder(FakeHost::user("1001", "Lan")).build();
    let err = h
        .state
        .profiles()
        .update_profile(ProfileFields::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::NotAuthenticated));
}

#[tokio::test]
async fn test_clearing_a_field() {
    let profiles = MemoryProfileTable::default();
    profiles.insert(stored("1001"));
    let h = Harness::builder(FakeHost::user("1001", "Lan"))
        .profiles(profiles)
        .build();
    h.state.profiles().login().await.unwrap();

    let fields = ProfileFields {
        default_address: FieldUpdate::Clear,
        ..ProfileFields::default()
    };
    let profile = h.state.profiles().update_profile(fields).await.unwrap();
    assert_eq!(profile.default_address, None);
    assert_eq!(profile.phone.as_deref(), Some("0900000000"));
}

#[tokio::test]
async fn test_request_phone_number_stores_it() {
    let h = Harness::builder(FakeHost::user("1001", "Lan")).build();
    h.state.profiles().login().await.unwrap();

    *h.host.phone.lock().unwrap() = Some(serde_json::json!({ "number": "0987654321" }));
    let phone = h.state.profiles().request_phone_number().await;

    assert_eq!(phone.as_deref(), Some("0987654321"));
    assert_eq!(
        h.profiles.get(&user("1001")).unwrap().phone.as_deref(),
        Some("0987654321")
    );
}

#[tokio::test]
async fn test_declined_phone_prompt_is_none() {
    let h = Harness::builder(FakeHost::user("1001", "Lan")).build();
    assert_eq!(h.state.profiles().request_phone_number().await, None);
    assert_eq!(h.profiles.writes(), 0);
}
