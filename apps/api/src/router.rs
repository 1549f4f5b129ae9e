use std::sync::Arc;

use axum::{routing::get, Router};

use appointment_cell::{booking_routes, BookingConflictGuard};
use notification_cell::{notification_routes, NotificationState};
use schedule_cell::{schedule_routes, AvailabilityResolver};

/// Everything the HTTP surface needs, built once in `main`.
pub struct Services {
    pub resolver: Arc<AvailabilityResolver>,
    pub guard: Arc<BookingConflictGuard>,
    pub notifications: NotificationState,
}

pub fn create_router(services: Services) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic scheduler is running!" }))
        .nest("/providers", schedule_routes(services.resolver))
        .nest("/bookings", booking_routes(services.guard))
        .nest("/notifications", notification_routes(services.notifications))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use notification_cell::{ReminderConfig, ReminderPlanner};
    use shared_database::Database;
    use shared_utils::test_utils::{seed_weekday_provider, utc};
    use shared_utils::{Clock, ManualClock};
    use tower::ServiceExt;

    async fn app() -> (Router, String) {
        let db = Database::open_in_memory().unwrap();
        let provider = seed_weekday_provider(&db).await.unwrap();
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(utc(2024, 6, 1, 8, 0)));

        let resolver = Arc::new(AvailabilityResolver::new(
            Arc::new(db.clone()),
            Arc::new(db.clone()),
            clock.clone(),
        ));
        let planner = Arc::new(ReminderPlanner::new(
            Arc::new(db.clone()),
            Arc::new(db.clone()),
            Arc::new(db.clone()),
            clock.clone(),
            ReminderConfig {
                default_lead_minutes: vec![1440, 120],
            },
        ));
        let guard = Arc::new(BookingConflictGuard::new(
            Arc::new(db.clone()),
            resolver.clone(),
            planner,
            clock.clone(),
        ));

        let router = create_router(Services {
            resolver,
            guard,
            notifications: NotificationState {
                notifications: Arc::new(db),
                clock,
            },
        });
        (router, provider.id.to_string())
    }

    async fn status_of(app: &Router, uri: &str) -> StatusCode {
        app.clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn cells_are_mounted() {
        let (app, provider_id) = app().await;

        assert_eq!(status_of(&app, "/").await, StatusCode::OK);
        assert_eq!(
            status_of(
                &app,
                &format!(
                    "/providers/{}/slot-check?date=2024-06-10&start_time=09:00:00&duration_minutes=30",
                    provider_id
                )
            )
            .await,
            StatusCode::OK
        );
        assert_eq!(status_of(&app, "/notifications/stats").await, StatusCode::OK);
        assert_eq!(
            status_of(&app, "/bookings/6f1c1a43-0f0c-4d8e-9a61-3b9cf52b8d11").await,
            StatusCode::NOT_FOUND
        );
    }
}
