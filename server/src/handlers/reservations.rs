//! Reservation handlers - make, update, remove and view.

use crate::error::Result;
use bookhold_engine::{Coordinator, Reservation, UpdateRequest};
use serde::{Deserialize, Serialize};

/// A user id as clients send it: a JSON number or a string.
///
/// Parsing is left to the coordinator so that every operation rejects
/// malformed ids the same way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserIdField {
    Number(i64),
    Text(String),
}

impl UserIdField {
    pub fn into_raw(self) -> String {
        match self {
            UserIdField::Number(n) => n.to_string(),
            UserIdField::Text(s) => s,
        }
    }
}

/// Request body for make_reservation.
#[derive(Debug, Deserialize)]
pub struct MakeReservationRequest {
    pub book_id: String,
    pub user_id: UserIdField,
}

/// Response for make_reservation.
#[derive(Debug, Serialize)]
pub struct MakeReservationResponse {
    pub message: String,
    pub reservation_id: String,
    pub reservation: Reservation,
}

/// Request body for update_reservation. Either form is accepted.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum UpdateReservationRequest {
    ById {
        reservation_id: String,
        #[serde(default)]
        new_user_id: Option<UserIdField>,
    },
    ByBook {
        book_id: String,
        user_id: UserIdField,
    },
}

/// Request body for remove_reservation.
#[derive(Debug, Deserialize)]
pub struct RemoveReservationRequest {
    pub book_id: String,
    pub user_id: UserIdField,
}

/// Response carrying a message and the affected reservation.
#[derive(Debug, Serialize)]
pub struct ReservationMessage {
    pub message: String,
    pub reservation: Reservation,
}

pub async fn handle_make(
    coordinator: &Coordinator,
    request: MakeReservationRequest,
) -> Result<MakeReservationResponse> {
    let reservation = coordinator
        .make_reservation(&request.book_id, &request.user_id.into_raw())
        .await?;

    let id = reservation.reservation_id.to_string();
    Ok(MakeReservationResponse {
        message: format!("Reservation {id} made successfully."),
        reservation_id: id,
        reservation,
    })
}

pub async fn handle_update(
    coordinator: &Coordinator,
    request: UpdateReservationRequest,
) -> Result<ReservationMessage> {
    let reservation = match request {
        UpdateReservationRequest::ById {
            reservation_id,
            new_user_id,
        } => {
            coordinator
                .update_reservation_by_raw_id(&reservation_id, new_user_id.map(UserIdField::into_raw))
                .await?
        }
        UpdateReservationRequest::ByBook { book_id, user_id } => {
            coordinator
                .update_reservation(UpdateRequest::ByBook {
                    book_id,
                    user_id: user_id.into_raw(),
                })
                .await?
        }
    };

    Ok(ReservationMessage {
        message: "Reservation updated successfully.".to_string(),
        reservation,
    })
}

pub async fn handle_remove(
    coordinator: &Coordinator,
    request: RemoveReservationRequest,
) -> Result<ReservationMessage> {
    let reservation = coordinator
        .remove_reservation(&request.book_id, &request.user_id.into_raw())
        .await?;

    Ok(ReservationMessage {
        message: "Reservation removed successfully.".to_string(),
        reservation,
    })
}

pub async fn handle_view(coordinator: &Coordinator, reservation_id: &str) -> Result<Reservation> {
    Ok(coordinator.view_reservation_by_raw_id(reservation_id).await?)
}
