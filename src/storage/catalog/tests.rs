use super::sqlite::SqliteCatalogStorage;
use super::*;
use crate::storage::memory_pool;

async fn setup_storage() -> SqliteCatalogStorage {
    SqliteCatalogStorage::new(memory_pool().await)
}

fn project(name: &str) -> NewProject {
    NewProject {
        name: name.to_string(),
        description: Some("radio play".to_string()),
    }
}

fn audio(project_id: Option<i64>) -> NewAudioFile {
    NewAudioFile {
        filename: "0b7e.wav".to_string(),
        original_filename: "narration.wav".to_string(),
        file_path: "/data/uploads/0b7e.wav".to_string(),
        file_size: 1024,
        format: "wav".to_string(),
        sample_rate: Some(44_100),
        channels: Some(2),
        duration: Some(1.5),
        project_id,
    }
}

#[tokio::test]
async fn test_project_names_are_unique() {
    let storage = setup_storage().await;
    storage.create_project(&project("The Long Night")).await.unwrap();
    assert!(storage.create_project(&project("The Long Night")).await.is_err());
    assert!(storage.find_project_by_name("The Long Night").await.unwrap().is_some());
}

#[tokio::test]
async fn test_deactivated_projects_are_hidden_from_listing() {
    let storage = setup_storage().await;
    let kept = storage.create_project(&project("Kept")).await.unwrap();
    let dropped = storage.create_project(&project("Dropped")).await.unwrap();

    assert!(storage.deactivate_project(dropped.id).await.unwrap());
    assert!(!storage.deactivate_project(404).await.unwrap());

    let listed = storage.list_projects(&Pagination::default()).await.unwrap();
    assert_eq!(listed.iter().map(|p| p.id).collect::<Vec<_>>(), vec![kept.id]);

    let still_there = storage.get_project(dropped.id).await.unwrap().unwrap();
    assert!(!still_there.is_active);
}

#[tokio::test]
async fn test_update_project_changes_only_given_fields() {
    let storage = setup_storage().await;
    let created = storage.create_project(&project("Draft")).await.unwrap();

    let updated = storage
        .update_project(
            created.id,
            &ProjectUpdate {
                name: Some("Final".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.name, "Final");
    assert_eq!(updated.description, created.description);
    assert!(updated.is_active);

    assert!(storage
        .update_project(999, &ProjectUpdate::default())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_audio_files_by_project() {
    let storage = setup_storage().await;
    let p = storage.create_project(&project("Episode 1")).await.unwrap();
    let in_project = storage.create_audio_file(&audio(Some(p.id))).await.unwrap();
    storage.create_audio_file(&audio(None)).await.unwrap();

    let fetched = storage.get_audio_file(in_project.id).await.unwrap().unwrap();
    assert_eq!(fetched, in_project);
    assert_eq!(fetched.sample_rate, Some(44_100));

    let files = storage.list_audio_files(Some(p.id), &Pagination::default()).await.unwrap();
    assert_eq!(files.len(), 1);
    let all = storage.list_audio_files(None, &Pagination::default()).await.unwrap();
    assert_eq!(all.len(), 2);
}
