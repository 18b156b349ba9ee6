use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{DbErr, EntityTrait, PaginatorTrait};
use tempfile::TempDir;

use uploadhub_server::config::UploadConfig;
use uploadhub_server::db;
use uploadhub_server::entities::upload_session;
use uploadhub_server::error::{UploadError, UploadResult};
use uploadhub_server::models::{Module, UploadStatus};
use uploadhub_server::repos::{ModuleRepo, ProjectRepo, SeaOrmModuleRepo, SeaOrmProjectRepo, SeaOrmUploadSessionRepo};
use uploadhub_server::state::AppState;
use uploadhub_server::usecase::metadata::encode_upload_metadata;
use uploadhub_server::usecase::{ModuleTarget, UploadService, UploadTarget};

struct Harness {
    _tmp: TempDir,
    state: AppState,
}

async fn harness(configure: impl FnOnce(&mut UploadConfig)) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let db = db::init_database(&tmp.path().join("test.db")).await.unwrap();
    let mut config = UploadConfig::new(tmp.path().join("storage"));
    config.max_upload_size = 10 * 1024;
    configure(&mut config);
    let state = AppState::new(db, config, "test-secret".into()).await.unwrap();
    Harness { _tmp: tmp, state }
}

fn project_meta(name: &str) -> String {
    encode_upload_metadata([("nama_proyek", name), ("kategori", "Web"), ("semester", "5")])
}

fn module_meta(title: &str) -> String {
    encode_upload_metadata([("judul", title), ("deskripsi", "Materi kuliah")])
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

async fn send<T: UploadTarget>(
    service: &UploadService<T>,
    id: &str,
    owner: &str,
    offset: u64,
    bytes: &[u8],
) -> UploadResult<u64> {
    let mut reader = bytes;
    service.handle_chunk(id, owner, offset, &mut reader, None).await
}

fn file_count(dir: &std::path::Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|e| {
            let path = e.path();
            if path.is_dir() {
                file_count(&path)
            } else {
                1
            }
        })
        .sum()
}

// ─── Happy path ───

#[tokio::test]
async fn test_three_chunk_project_upload_completes() {
    let h = harness(|_| {}).await;
    let projects = &h.state.projects;
    let data = payload(3072);

    let upload = projects
        .initiate("u1", 3072, &project_meta("Sistem Informasi"), None)
        .await
        .unwrap();
    assert_eq!(upload.offset, 0);
    assert!(!upload.queued);
    assert!(upload.url.ends_with(&upload.id));

    assert_eq!(send(projects, &upload.id, "u1", 0, &data[..1024]).await.unwrap(), 1024);
    assert_eq!(send(projects, &upload.id, "u1", 1024, &data[1024..2048]).await.unwrap(), 2048);
    assert_eq!(send(projects, &upload.id, "u1", 2048, &data[2048..]).await.unwrap(), 3072);

    let info = projects.info(&upload.id, "u1", None).await.unwrap();
    assert_eq!(info.status, UploadStatus::Completed);
    assert_eq!(info.progress, 100.0);

    let project_id = info.target_entity_id.unwrap();
    let project = SeaOrmProjectRepo::new(h.state.db.clone())
        .get_by_id(&project_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(project.owner_id, "u1");
    assert_eq!(project.name, "Sistem Informasi");
    assert_eq!(project.semester, 5);
    assert_eq!(project.file_size, 3072);
    assert!(project.file_path.ends_with(".zip"));
    assert_eq!(std::fs::read(&project.file_path).unwrap(), data);

    // Temporary container is gone; the slot is free again.
    assert_eq!(file_count(&h.state.config.temp_dir()), 0);
    assert_eq!(projects.check_slot("u1").await.unwrap().active, 0);
}

#[tokio::test]
async fn test_pause_and_resume() {
    let h = harness(|_| {}).await;
    let projects = &h.state.projects;
    let data = payload(3072);

    let upload = projects
        .initiate("u1", 3072, &project_meta("Aplikasi Kasir"), None)
        .await
        .unwrap();
    send(projects, &upload.id, "u1", 0, &data[..1024]).await.unwrap();

    let progress = projects.status(&upload.id, "u1", None).await.unwrap();
    assert_eq!((progress.offset, progress.declared_size), (1024, 3072));
    let info = projects.info(&upload.id, "u1", None).await.unwrap();
    assert_eq!(info.status, UploadStatus::Uploading);

    // A replay of the first chunk is refused with the offset to resume from.
    let err = send(projects, &upload.id, "u1", 0, &data[..1024]).await.unwrap_err();
    assert!(matches!(err, UploadError::OffsetMismatch { offset: 1024 }));

    send(projects, &upload.id, "u1", 1024, &data[1024..]).await.unwrap();
    let info = projects.info(&upload.id, "u1", None).await.unwrap();
    assert_eq!(info.status, UploadStatus::Completed);
}

#[tokio::test]
async fn test_zero_length_chunk_keeps_session_pending() {
    let h = harness(|_| {}).await;
    let projects = &h.state.projects;

    let upload = projects
        .initiate("u1", 10, &project_meta("Kosong Dulu"), None)
        .await
        .unwrap();
    assert_eq!(send(projects, &upload.id, "u1", 0, b"").await.unwrap(), 0);
    let info = projects.info(&upload.id, "u1", None).await.unwrap();
    assert_eq!(info.status, UploadStatus::Pending);
}

#[tokio::test]
async fn test_overflowing_chunk_is_rejected_without_progress() {
    let h = harness(|_| {}).await;
    let modules = &h.state.modules;

    let upload = modules.initiate("u1", 8, &module_meta("Kalkulus"), None).await.unwrap();
    let err = send(modules, &upload.id, "u1", 0, &payload(9)).await.unwrap_err();
    assert!(matches!(err, UploadError::Validation(_)));
    assert_eq!(modules.status(&upload.id, "u1", None).await.unwrap().offset, 0);
}

// ─── Validation ───

#[tokio::test]
async fn test_oversized_upload_creates_no_session() {
    let h = harness(|c| c.max_upload_size = 4096).await;
    let err = h
        .state
        .projects
        .initiate("u1", 4097, &project_meta("Terlalu Besar"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::PayloadTooLarge { size: 4097, max: 4096 }));

    let rows = upload_session::Entity::find().count(&h.state.db).await.unwrap();
    assert_eq!(rows, 0);
    assert_eq!(h.state.projects.check_slot("u1").await.unwrap().active, 0);
}

#[tokio::test]
async fn test_zero_size_is_invalid() {
    let h = harness(|_| {}).await;
    let err = h
        .state
        .modules
        .initiate("u1", 0, &module_meta("Kalkulus"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Validation(_)));
}

#[tokio::test]
async fn test_missing_metadata_field_consumes_no_slot() {
    let h = harness(|_| {}).await;
    let modules = &h.state.modules;

    let raw = encode_upload_metadata([("deskripsi", "tanpa judul")]);
    let err = modules.initiate("u1", 100, &raw, None).await.unwrap_err();
    match err {
        UploadError::Validation(message) => assert!(message.contains("judul")),
        other => panic!("expected validation error, got {other:?}"),
    }

    let err = modules.initiate("u1", 100, "", None).await.unwrap_err();
    assert!(matches!(err, UploadError::Validation(_)));

    let slot = modules.check_slot("u1").await.unwrap();
    assert_eq!(slot.active, 0);
    assert!(slot.available);
}

#[tokio::test]
async fn test_malformed_metadata_is_rejected() {
    let h = harness(|_| {}).await;
    let err = h
        .state
        .projects
        .initiate("u1", 100, "nama_proyek ***", None)
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Validation(_)));
}

// ─── Admission ───

#[tokio::test]
async fn test_project_queue_promotes_in_fifo_order() {
    let h = harness(|c| c.max_concurrent_projects = 1).await;
    let projects = &h.state.projects;

    let a = projects.initiate("u1", 4, &project_meta("Proyek A"), None).await.unwrap();
    let b = projects.initiate("u2", 8, &project_meta("Proyek B"), None).await.unwrap();
    let c = projects.initiate("u3", 4, &project_meta("Proyek C"), None).await.unwrap();
    assert!(!a.queued);
    assert_eq!((b.queued, b.queue_position), (true, Some(1)));
    assert_eq!((c.queued, c.queue_position), (true, Some(2)));

    let slot = projects.check_slot("u4").await.unwrap();
    assert!(!slot.available);
    assert_eq!((slot.active, slot.queued, slot.max), (1, 2, 1));

    // Queued sessions cannot send data yet.
    let err = send(projects, &b.id, "u2", 0, b"abcd").await.unwrap_err();
    assert!(matches!(err, UploadError::Conflict(_)));

    send(projects, &a.id, "u1", 0, b"abcd").await.unwrap();
    assert_eq!(send(projects, &b.id, "u2", 0, b"abcd").await.unwrap(), 4);
    let err = send(projects, &c.id, "u3", 0, b"abcd").await.unwrap_err();
    assert!(matches!(err, UploadError::Conflict(_)));
}

#[tokio::test]
async fn test_cancel_releases_slot() {
    let h = harness(|c| c.max_concurrent_projects = 1).await;
    let projects = &h.state.projects;

    let a = projects.initiate("u1", 8, &project_meta("Proyek A"), None).await.unwrap();
    let b = projects.initiate("u2", 8, &project_meta("Proyek B"), None).await.unwrap();
    send(projects, &a.id, "u1", 0, b"abcd").await.unwrap();

    projects.cancel(&a.id, "u1", None).await.unwrap();
    let info = projects.info(&a.id, "u1", None).await.unwrap();
    assert_eq!(info.status, UploadStatus::Cancelled);

    assert_eq!(send(projects, &b.id, "u2", 0, b"abcd").await.unwrap(), 4);

    let err = projects.cancel(&a.id, "u1", None).await.unwrap_err();
    assert!(matches!(err, UploadError::Inactive(_)));
    let err = send(projects, &a.id, "u1", 4, b"efgh").await.unwrap_err();
    assert!(matches!(err, UploadError::Inactive(_)));
    assert_eq!(file_count(&h.state.config.projects_dir()), 0);
}

#[tokio::test]
async fn test_module_admission_rejects_beyond_global_limit() {
    let h = harness(|c| c.max_concurrent_modules = 2).await;
    let modules = &h.state.modules;

    modules.initiate("u1", 10, &module_meta("Modul Satu"), None).await.unwrap();
    modules.initiate("u2", 10, &module_meta("Modul Dua"), None).await.unwrap();
    let err = modules
        .initiate("u3", 10, &module_meta("Modul Tiga"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Conflict(_)));

    let rows = upload_session::Entity::find().count(&h.state.db).await.unwrap();
    assert_eq!(rows, 2);
}

#[tokio::test]
async fn test_module_per_owner_cap() {
    let h = harness(|c| c.max_module_queue_per_owner = 2).await;
    let modules = &h.state.modules;

    let first = modules.initiate("u1", 10, &module_meta("Modul Satu"), None).await.unwrap();
    modules.initiate("u1", 10, &module_meta("Modul Dua"), None).await.unwrap();

    let slot = modules.check_slot("u1").await.unwrap();
    assert!(!slot.available);
    assert_eq!((slot.active, slot.max), (2, 2));
    let err = modules
        .initiate("u1", 10, &module_meta("Modul Tiga"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Conflict(_)));

    // Other owners are unaffected, and cancelling frees the owner's capacity.
    modules.initiate("u2", 10, &module_meta("Modul Lain"), None).await.unwrap();
    modules.cancel(&first.id, "u1", None).await.unwrap();
    modules.initiate("u1", 10, &module_meta("Modul Tiga"), None).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_initiates_respect_per_owner_cap() {
    let h = harness(|c| {
        c.max_module_queue_per_owner = 2;
        c.max_concurrent_modules = 50;
    })
    .await;

    let mut tasks = Vec::new();
    for i in 0..20 {
        let modules = h.state.modules.clone();
        tasks.push(tokio::spawn(async move {
            modules
                .initiate("u1", 10, &module_meta(&format!("Modul {i}")), None)
                .await
        }));
    }
    let mut accepted = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(err) => assert!(matches!(err, UploadError::Conflict(_)), "{err:?}"),
        }
    }

    assert_eq!(accepted, 2);
    assert_eq!(h.state.modules.check_slot("u1").await.unwrap().active, 2);
    let rows = upload_session::Entity::find().count(&h.state.db).await.unwrap();
    assert_eq!(rows, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_during_chunk_is_terminal_not_internal() {
    let h = harness(|_| {}).await;

    for round in 0..50 {
        let upload = h
            .state
            .projects
            .initiate("u1", 8192, &project_meta(&format!("Proyek {round}")), None)
            .await
            .unwrap();

        let projects = h.state.projects.clone();
        let id = upload.id.clone();
        let chunk = tokio::spawn(async move {
            let data = payload(4096);
            let mut reader = &data[..];
            projects.handle_chunk(&id, "u1", 0, &mut reader, None).await
        });
        let projects = h.state.projects.clone();
        let id = upload.id.clone();
        let cancel = tokio::spawn(async move { projects.cancel(&id, "u1", None).await });

        match chunk.await.unwrap() {
            Ok(offset) => assert_eq!(offset, 4096),
            Err(err) => assert!(matches!(err, UploadError::Inactive(_)), "{err:?}"),
        }
        cancel.await.unwrap().unwrap();

        let info = h.state.projects.info(&upload.id, "u1", None).await.unwrap();
        assert_eq!(info.status, UploadStatus::Cancelled);
    }

    assert_eq!(file_count(&h.state.config.temp_dir()), 0);
    assert_eq!(h.state.projects.check_slot("u1").await.unwrap().active, 0);
}

#[tokio::test]
async fn test_reset_queue_cancels_owner_sessions() {
    let h = harness(|c| c.max_concurrent_projects = 1).await;
    let projects = &h.state.projects;

    let a = projects.initiate("u1", 4, &project_meta("Proyek A"), None).await.unwrap();
    let b = projects.initiate("u1", 4, &project_meta("Proyek B"), None).await.unwrap();
    let other = projects.initiate("u2", 4, &project_meta("Proyek C"), None).await.unwrap();
    assert!(other.queued);

    assert_eq!(projects.reset_queue("u1").await.unwrap(), 2);
    for id in [&a.id, &b.id] {
        let info = projects.info(id, "u1", None).await.unwrap();
        assert_eq!(info.status, UploadStatus::Cancelled);
    }
    assert_eq!(send(projects, &other.id, "u2", 0, b"abcd").await.unwrap(), 4);
    assert_eq!(projects.reset_queue("u1").await.unwrap(), 0);
}

// ─── Terminal states and ownership ───

#[tokio::test]
async fn test_completed_session_reports_already_completed() {
    let h = harness(|_| {}).await;
    let modules = &h.state.modules;

    let upload = modules.initiate("u1", 4, &module_meta("Fisika"), None).await.unwrap();
    send(modules, &upload.id, "u1", 0, b"%PDF").await.unwrap();

    let err = send(modules, &upload.id, "u1", 4, b"").await.unwrap_err();
    assert!(matches!(err, UploadError::AlreadyCompleted { size: 4 }));
    assert_eq!(err.resume_offset(), Some(4));

    let err = modules.cancel(&upload.id, "u1", None).await.unwrap_err();
    assert!(matches!(err, UploadError::AlreadyCompleted { size: 4 }));
}

#[tokio::test]
async fn test_other_owner_is_forbidden() {
    let h = harness(|_| {}).await;
    let modules = &h.state.modules;

    let upload = modules.initiate("u1", 4, &module_meta("Biologi"), None).await.unwrap();
    assert!(matches!(
        send(modules, &upload.id, "u2", 0, b"abcd").await,
        Err(UploadError::Forbidden)
    ));
    assert!(matches!(
        modules.status(&upload.id, "u2", None).await,
        Err(UploadError::Forbidden)
    ));
    assert!(matches!(
        modules.cancel(&upload.id, "u2", None).await,
        Err(UploadError::Forbidden)
    ));
    assert!(matches!(
        modules.status("missing", "u1", None).await,
        Err(UploadError::NotFound(_))
    ));

    // Sessions are scoped per kind.
    assert!(matches!(
        h.state.projects.status(&upload.id, "u1", None).await,
        Err(UploadError::NotFound(_))
    ));
}

// ─── Updates ───

#[tokio::test]
async fn test_update_replaces_file_and_keeps_omitted_fields() {
    let h = harness(|_| {}).await;
    let modules = &h.state.modules;
    let repo = SeaOrmModuleRepo::new(h.state.db.clone());

    let first = modules.initiate("u1", 4, &module_meta("Basis Data"), None).await.unwrap();
    send(modules, &first.id, "u1", 0, b"old!").await.unwrap();
    let module_id = modules
        .info(&first.id, "u1", None)
        .await
        .unwrap()
        .target_entity_id
        .unwrap();
    let before = repo.get_by_id(&module_id).await.unwrap().unwrap();

    // Another owner may not replace the file.
    let err = modules
        .initiate("u2", 6, &module_meta("Basis Data"), Some(&module_id))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Forbidden));

    let raw = encode_upload_metadata([("deskripsi", "Revisi kedua")]);
    let update = modules.initiate("u1", 6, &raw, Some(&module_id)).await.unwrap();
    let mut reader: &[u8] = b"new!!!";
    modules
        .handle_chunk(&update.id, "u1", 0, &mut reader, Some(&module_id))
        .await
        .unwrap();

    let after = repo.get_by_id(&module_id).await.unwrap().unwrap();
    assert_eq!(after.title, "Basis Data");
    assert_eq!(after.description, "Revisi kedua");
    assert_eq!(after.file_size, 6);
    assert!(after.updated_at.is_some());
    assert_ne!(after.file_path, before.file_path);
    assert_eq!(std::fs::read(&after.file_path).unwrap(), b"new!!!");
    assert!(!std::path::Path::new(&before.file_path).exists());
    assert_eq!(file_count(&h.state.config.modules_dir()), 1);
}

#[tokio::test]
async fn test_update_of_missing_entity_is_not_found() {
    let h = harness(|_| {}).await;
    let err = h
        .state
        .projects
        .initiate("u1", 10, "", Some("no-such-project"))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::NotFound(_)));
}

#[tokio::test]
async fn test_entity_scoped_access_checks_target() {
    let h = harness(|_| {}).await;
    let modules = &h.state.modules;

    let upload = modules.initiate("u1", 4, &module_meta("Statistika"), None).await.unwrap();
    assert!(matches!(
        modules.status(&upload.id, "u1", Some("some-other-module")).await,
        Err(UploadError::Forbidden)
    ));
}

// ─── Failure cleanup ───

struct FlakyModules {
    inner: SeaOrmModuleRepo,
    fail_create: AtomicBool,
}

#[async_trait]
impl ModuleRepo for FlakyModules {
    async fn create(&self, module: Module) -> Result<Module, DbErr> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(DbErr::Custom("disk full".into()));
        }
        self.inner.create(module).await
    }

    async fn update(&self, module: Module) -> Result<Module, DbErr> {
        self.inner.update(module).await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Module>, DbErr> {
        self.inner.get_by_id(id).await
    }

    async fn delete(&self, id: &str) -> Result<(), DbErr> {
        self.inner.delete(id).await
    }
}

#[tokio::test]
async fn test_failed_completion_cleans_up_and_can_be_retried() {
    let h = harness(|_| {}).await;
    let repo = Arc::new(FlakyModules {
        inner: SeaOrmModuleRepo::new(h.state.db.clone()),
        fail_create: AtomicBool::new(true),
    });
    let modules = UploadService::new(
        ModuleTarget::new(repo.clone(), 5),
        Arc::new(SeaOrmUploadSessionRepo::new(h.state.db.clone(), ModuleTarget::KIND)),
        h.state.manager.clone(),
        chrono::Duration::hours(1),
        "/api/uploads",
    );
    let data = payload(2048);

    let upload = modules.initiate("u1", 2048, &module_meta("Jaringan"), None).await.unwrap();
    send(&modules, &upload.id, "u1", 0, &data[..1024]).await.unwrap();
    let err = send(&modules, &upload.id, "u1", 1024, &data[1024..]).await.unwrap_err();
    assert!(matches!(err, UploadError::Internal(_)));
    assert_eq!(err.to_string(), "internal error");

    // Nothing permanent was left behind and the session can still finish.
    assert_eq!(file_count(&h.state.config.modules_dir()), 0);
    let info = modules.info(&upload.id, "u1", None).await.unwrap();
    assert_eq!(info.status, UploadStatus::Uploading);
    assert_eq!(info.offset, 2048);

    repo.fail_create.store(false, Ordering::SeqCst);
    assert_eq!(send(&modules, &upload.id, "u1", 2048, b"").await.unwrap(), 2048);
    let info = modules.info(&upload.id, "u1", None).await.unwrap();
    assert_eq!(info.status, UploadStatus::Completed);
    assert_eq!(file_count(&h.state.config.modules_dir()), 1);
    let module = repo
        .get_by_id(&info.target_entity_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(std::fs::read(&module.file_path).unwrap(), data);
}

// ─── Reaper ───

#[tokio::test]
async fn test_reap_reclaims_expired_sessions() {
    let h = harness(|c| c.max_concurrent_projects = 1).await;
    let projects = &h.state.projects;

    let stale = projects.initiate("u1", 8, &project_meta("Proyek Lama"), None).await.unwrap();
    let waiting = projects.initiate("u2", 8, &project_meta("Proyek Baru"), None).await.unwrap();
    send(projects, &stale.id, "u1", 0, b"abcd").await.unwrap();

    let now = chrono::Utc::now();
    assert!(projects.expired_sessions(now).await.unwrap().is_empty());

    let later = now + chrono::Duration::days(2);
    let expired = projects.expired_sessions(later).await.unwrap();
    assert_eq!(expired.len(), 2);

    assert!(projects.reclaim(&stale.id).await.unwrap());
    assert!(!projects.reclaim(&stale.id).await.unwrap());
    let info = projects.info(&stale.id, "u1", None).await.unwrap();
    assert_eq!(info.status, UploadStatus::Cancelled);

    assert_eq!(projects.reap(later, chrono::Duration::days(30)).await.unwrap(), 1);
    let info = projects.info(&waiting.id, "u2", None).await.unwrap();
    assert_eq!(info.status, UploadStatus::Cancelled);
    assert_eq!(file_count(&h.state.config.temp_dir()), 0);
}

#[tokio::test]
async fn test_readmit_restores_queue_after_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let db_path = tmp.path().join("test.db");
    let mut config = UploadConfig::new(tmp.path().join("storage"));
    config.max_concurrent_projects = 1;

    let (a, b) = {
        let db = db::init_database(&db_path).await.unwrap();
        let state = AppState::new(db, config.clone(), "s".into()).await.unwrap();
        let a = state.projects.initiate("u1", 8, &project_meta("Proyek A"), None).await.unwrap();
        send(&state.projects, &a.id, "u1", 0, b"abcd").await.unwrap();
        let b = state.projects.initiate("u2", 8, &project_meta("Proyek B"), None).await.unwrap();
        assert!(b.queued);
        (a, b)
    };

    let db = db::init_database(&db_path).await.unwrap();
    let state = AppState::new(db, config, "s".into()).await.unwrap();
    state.readmit().await.unwrap();

    let err = send(&state.projects, &b.id, "u2", 0, b"abcd").await.unwrap_err();
    assert!(matches!(err, UploadError::Conflict(_)));
    assert_eq!(send(&state.projects, &a.id, "u1", 4, b"efgh").await.unwrap(), 8);
    assert_eq!(send(&state.projects, &b.id, "u2", 0, b"abcd").await.unwrap(), 4);
}
