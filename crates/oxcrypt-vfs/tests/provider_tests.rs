//! Provider dispatch, ownership checks and filesystem identity.
//!
//! Run: `cargo nextest run -p oxcrypt-vfs --test provider_tests`

mod common;

use std::sync::Arc;

use common::{TestVault, create_vault, foreign_path, test_properties};
use oxcrypt_vfs::fs::accept_all;
use oxcrypt_vfs::fs::channel::OpenOptions;
use oxcrypt_vfs::vault::attributes::{AccessMode, AttributeValue, CopyOption};
use oxcrypt_vfs::{CryptoFileSystemProvider, FsError, SCHEME};
use tempfile::TempDir;

fn assert_mismatch<T>(result: Result<T, FsError>) {
    match result {
        Err(FsError::ProviderMismatch { .. }) => {}
        Err(other) => panic!("expected ProviderMismatch, got {other}"),
        Ok(_) => panic!("expected ProviderMismatch, got Ok"),
    }
}

// ============================================================================
// Ownership
// ============================================================================

#[test]
fn test_foreign_paths_are_rejected_without_delegation() {
    let provider = CryptoFileSystemProvider::new();
    let (recording, path) = foreign_path("/a/b");
    let (_other, other_path) = foreign_path("/c");

    assert_mismatch(provider.new_directory_stream(&path, accept_all()));
    assert_mismatch(provider.create_directory(&path));
    assert_mismatch(provider.delete(&path));
    assert_mismatch(provider.delete_if_exists(&path));
    assert_mismatch(provider.copy(&path, &other_path, &[]));
    assert_mismatch(provider.move_path(&path, &other_path, &[CopyOption::ReplaceExisting]));
    assert_mismatch(provider.is_same_file(&path, &path));
    assert_mismatch(provider.is_hidden(&path));
    assert_mismatch(provider.exists(&path));
    assert_mismatch(provider.get_file_store(&path));
    assert_mismatch(provider.check_access(&path, &[AccessMode::Read]));
    assert_mismatch(provider.get_file_attribute_view(&path));
    assert_mismatch(provider.read_attributes(&path));
    assert_mismatch(provider.read_attributes_named(&path, "basic:*"));
    assert_mismatch(provider.set_attribute(&path, "basic:lastModifiedTime", AttributeValue::U64(0)));
    assert_mismatch(provider.new_file_channel(&path, &OpenOptions::read()));
    assert_mismatch(provider.new_byte_channel(&path, &OpenOptions::read()));

    assert_eq!(recording.calls(), 0);
}

#[test]
fn test_copy_checks_target_ownership() {
    let vault = TestVault::new();
    vault.write("/a.txt", b"a");
    let (recording, foreign) = foreign_path("/b.txt");

    assert_mismatch(vault.provider.copy(&vault.path("/a.txt"), &foreign, &[]));
    assert_mismatch(vault.provider.move_path(&vault.path("/a.txt"), &foreign, &[]));
    assert_eq!(recording.calls(), 0);
    assert_eq!(vault.read("/a.txt"), b"a");
}

#[test]
fn test_paths_of_another_provider_are_rejected() {
    let vault = TestVault::new();
    let stranger = CryptoFileSystemProvider::new();

    assert_mismatch(stranger.read_attributes(&vault.path("/")));
    assert_mismatch(stranger.create_directory(&vault.path("/x")));
    assert!(!vault.provider.exists(&vault.path("/x")).unwrap());
}

// ============================================================================
// Registry identity
// ============================================================================

#[test]
fn test_one_instance_per_vault_root() {
    let vault = TestVault::new();
    let again = vault
        .provider
        .new_file_system_at(&vault.root, &test_properties())
        .unwrap();
    assert!(Arc::ptr_eq(&vault.fs, &again));

    let uri = vault.path("/").to_uri().unwrap();
    let by_uri = vault.provider.get_file_system(&uri).unwrap();
    assert!(Arc::ptr_eq(&vault.fs, &by_uri));
}

#[test]
fn test_distinct_roots_get_distinct_instances() {
    let tmp = TempDir::new().unwrap();
    let (a, b) = (tmp.path().join("a"), tmp.path().join("b"));
    create_vault(&a);
    create_vault(&b);
    let provider = CryptoFileSystemProvider::new();

    let fs_a = provider.new_file_system_at(&a, &test_properties()).unwrap();
    let fs_b = provider.new_file_system_at(&b, &test_properties()).unwrap();
    assert!(!Arc::ptr_eq(&fs_a, &fs_b));
    assert_eq!(provider.registry().len(), 2);
}

#[test]
fn test_closed_filesystem_leaves_registry() {
    let vault = TestVault::new();
    assert!(vault.provider.registry().contains(&vault.root));

    vault.fs.close().unwrap();
    assert!(!vault.provider.registry().contains(&vault.root));
    assert!(matches!(
        vault.provider.read_attributes(&vault.path("/")),
        Err(FsError::ClosedFileSystem)
    ));

    let reopened = vault
        .provider
        .new_file_system_at(&vault.root, &test_properties())
        .unwrap();
    assert!(!Arc::ptr_eq(&vault.fs, &reopened));
    assert!(reopened.is_open());
}

#[test]
fn test_get_file_system_before_open() {
    let tmp = TempDir::new().unwrap();
    let provider = CryptoFileSystemProvider::new();
    let uri = url::Url::parse(&format!(
        "{SCHEME}:/?vault={}",
        tmp.path().display()
    ))
    .unwrap();
    assert!(matches!(
        provider.get_file_system(&uri),
        Err(FsError::FileSystemNotFound { .. })
    ));
}

#[test]
fn test_wrong_passphrase_is_not_registered() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("vault");
    create_vault(&root);
    let provider = CryptoFileSystemProvider::new();
    let props = oxcrypt_vfs::CryptoFileSystemProperties::builder()
        .passphrase(secrecy::SecretString::from("wrong".to_string()))
        .build()
        .unwrap();

    assert!(provider.new_file_system_at(&root, &props).is_err());
    assert!(provider.registry().is_empty());
}

// ============================================================================
// Same file and URIs
// ============================================================================

#[test]
fn test_is_same_file() {
    let vault = TestVault::new();
    vault.write("/f.txt", b"x");

    assert!(
        vault
            .provider
            .is_same_file(&vault.path("/f.txt"), &vault.path("/dir/../f.txt"))
            .unwrap()
    );
    assert!(
        !vault
            .provider
            .is_same_file(&vault.path("/f.txt"), &vault.path("/g.txt"))
            .unwrap()
    );

    let tmp = TempDir::new().unwrap();
    create_vault(tmp.path());
    let other = vault
        .provider
        .new_file_system_at(tmp.path(), &test_properties())
        .unwrap();
    assert!(
        !vault
            .provider
            .is_same_file(&vault.path("/f.txt"), &other.get_path("/f.txt", &[]))
            .unwrap()
    );
}

#[test]
fn test_is_same_file_is_false_for_foreign_paths() {
    let vault = TestVault::new();
    vault.write("/f.txt", b"x");
    let (recording, foreign) = foreign_path("/f.txt");

    assert!(
        !vault
            .provider
            .is_same_file(&vault.path("/f.txt"), &foreign)
            .unwrap()
    );
    assert!(
        !vault
            .provider
            .is_same_file(&foreign, &vault.path("/f.txt"))
            .unwrap()
    );
    assert_eq!(recording.calls(), 0);
}

#[test]
fn test_uri_round_trip() {
    let vault = TestVault::new();
    let path = vault.path("/some dir/file #1.txt");

    let uri = path.to_uri().unwrap();
    assert_eq!(uri.scheme(), SCHEME);

    let back = vault.provider.get_path(&uri).unwrap();
    assert_eq!(back, path);
    assert!(Arc::ptr_eq(back.file_system(), &vault.fs));
}
