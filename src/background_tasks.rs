use std::time::Duration;

use actix_web::web;

use crate::AppData;

async fn delete_old_polls(app_data: &AppData, retention: chrono::Duration) {
    let cutoff = chrono::Utc::now() - retention;
    match app_data.engine.purge_older_than(cutoff).await {
        Ok(purged) => {
            if purged > 0 {
                log::info!("deleted {} polls created before {}", purged, cutoff);
            }
        }
        Err(e) => {
            log::error!("{}", e);
        }
    }
}

pub(crate) fn spawn_poll_retention_task(
    app_data: web::Data<AppData>,
    retention: chrono::Duration,
) {
    actix_rt::spawn(async move {
        // every hour
        let hours = 1;
        let seconds = hours * 60 * 60;
        let mut interval = actix_rt::time::interval(Duration::from_secs(seconds));
        loop {
            interval.tick().await;
            delete_old_polls(&app_data, retention).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::testing::app_data;

    #[actix_web::test]
    async fn old_polls_are_deleted() {
        let app_data = app_data();
        let poll = app_data
            .engine
            .create_poll("Stale?", ["yes", "no"])
            .await
            .unwrap();

        delete_old_polls(&app_data, chrono::Duration::days(1)).await;
        assert!(app_data.engine.get_poll(poll.id()).await.is_ok());

        // a negative window puts the cutoff in the future
        delete_old_polls(&app_data, chrono::Duration::seconds(-5)).await;
        assert!(app_data.engine.get_poll(poll.id()).await.is_err());
    }
}
