use std::sync::Arc;

use bastion_core::{AppError, AppResult};
use bastion_domain::{EncryptedSecret, Principal, ProtectedResourceRegistry, Role};
use uuid::Uuid;

use super::EnvelopeEncryptionService;
use crate::test_support::{FakeCipher, FakeKeyRepository, FakeMasterKey};
use crate::{AccessPolicyEngine, EncryptionKeyRegistry};

fn build_service() -> AppResult<EnvelopeEncryptionService> {
    let registry = Arc::new(EncryptionKeyRegistry::new(
        Arc::new(FakeKeyRepository::default()),
        Arc::new(FakeMasterKey),
        Arc::new(FakeCipher),
    ));
    EnvelopeEncryptionService::new(
        registry,
        AccessPolicyEngine::standard(&ProtectedResourceRegistry::standard()?)?,
    )
}

fn admin() -> AppResult<Principal> {
    Principal::new("a1", Role::Admin)
}

#[tokio::test]
async fn encrypt_then_decrypt_returns_plaintext() -> AppResult<()> {
    let service = build_service()?;
    let admin = admin()?;

    let secret = service
        .encrypt(&admin, "customer_pii", b"4111-1111-1111-1111")
        .await?;
    let parsed = EncryptedSecret::parse(secret.encode().as_str())?;

    assert_eq!(secret.key_version(), 1);
    assert_eq!(
        service.decrypt(&admin, &parsed).await?,
        b"4111-1111-1111-1111".to_vec()
    );
    Ok(())
}

#[tokio::test]
async fn old_ciphertext_decrypts_after_rotation() -> AppResult<()> {
    let service = build_service()?;
    let admin = admin()?;
    let before = service.encrypt(&admin, "customer_pii", b"alpha").await?;

    service.rotate_key(&admin, "customer_pii").await?;
    let after = service.encrypt(&admin, "customer_pii", b"beta").await?;

    assert_eq!(after.key_version(), 2);
    assert_eq!(service.decrypt(&admin, &before).await?, b"alpha".to_vec());
    assert_eq!(service.decrypt(&admin, &after).await?, b"beta".to_vec());
    Ok(())
}

#[tokio::test]
async fn reencrypt_moves_secret_to_active_version() -> AppResult<()> {
    let service = build_service()?;
    let admin = admin()?;
    let original = service.encrypt(&admin, "customer_pii", b"alpha").await?;
    service.rotate_key(&admin, "customer_pii").await?;

    let moved = service.reencrypt(&admin, &original).await?;
    let unchanged = service.reencrypt(&admin, &moved).await?;

    assert_eq!(moved.key_version(), 2);
    assert_eq!(unchanged, moved);
    assert_eq!(service.decrypt(&admin, &moved).await?, b"alpha".to_vec());
    Ok(())
}

#[tokio::test]
async fn create_key_registers_version_one_once() -> AppResult<()> {
    let service = build_service()?;
    let admin = admin()?;

    let created = service.create_key(&admin, "stripe-api").await?;
    let again = service.create_key(&admin, "stripe-api").await;
    let secret = service.encrypt(&admin, "stripe-api", b"sk_live").await?;

    assert_eq!(created.version(), 1);
    assert!(created.is_active());
    assert!(matches!(again, Err(AppError::Conflict(_))));
    assert_eq!(secret.key_id(), created.key_id());
    assert_eq!(service.list_key_versions(&admin, "stripe-api").await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn create_key_requires_admin() -> AppResult<()> {
    let service = build_service()?;
    let manager = Principal::new("m1", Role::SalesManager)?;

    let result = service.create_key(&manager, "stripe-api").await;
    assert!(matches!(result, Err(AppError::PermissionDenied(_))));
    Ok(())
}

#[tokio::test]
async fn non_admin_cannot_use_keys() -> AppResult<()> {
    let service = build_service()?;
    let rep = Principal::new("p1", Role::SalesRep)?;

    let result = service.encrypt(&rep, "customer_pii", b"alpha").await;
    assert!(matches!(result, Err(AppError::PermissionDenied(_))));
    Ok(())
}

#[tokio::test]
async fn unknown_version_is_key_not_found() -> AppResult<()> {
    let service = build_service()?;
    let admin = admin()?;
    let secret = service.encrypt(&admin, "customer_pii", b"alpha").await?;
    let forged = EncryptedSecret::parse(
        secret
            .encode()
            .replacen("customer_pii:1:", "customer_pii:7:", 1)
            .as_str(),
    )?;

    let result = service.decrypt(&admin, &forged).await;
    assert!(matches!(result, Err(AppError::KeyNotFound(_))));
    Ok(())
}

#[tokio::test]
async fn mismatched_key_id_fails_decryption() -> AppResult<()> {
    let service = build_service()?;
    let admin = admin()?;
    let secret = service.encrypt(&admin, "customer_pii", b"alpha").await?;
    let forged = EncryptedSecret::parse(
        secret
            .encode()
            .replacen(secret.key_id().to_string().as_str(), Uuid::new_v4().to_string().as_str(), 1)
            .as_str(),
    )?;

    let result = service.decrypt(&admin, &forged).await;
    assert!(matches!(result, Err(AppError::DecryptionFailed(_))));
    Ok(())
}
