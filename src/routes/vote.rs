use actix_web::{
    web::{self, ServiceConfig},
    HttpRequest, HttpResponse,
};

use super::voter_id;
use crate::{
    error::PollError,
    models::{ChoiceId, Message, PollId},
    AppData,
};

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct VotePostRequestData {
    choice_id: ChoiceId,
}

async fn post_vote(
    app_data: web::Data<AppData>,
    path_id: web::Path<i64>,
    vote: web::Json<VotePostRequestData>,
    request: HttpRequest,
) -> Result<HttpResponse, PollError> {
    let voter = match voter_id(&request) {
        Some(voter) => voter,
        None => {
            log::error!("request carries neither a voter id nor a peer address");
            return Ok(HttpResponse::InternalServerError().json(Message("internal server error")));
        }
    };
    let tally = app_data
        .engine
        .cast_vote(PollId(path_id.into_inner()), vote.choice_id, voter)
        .await?;
    Ok(HttpResponse::Ok().json(tally))
}

async fn delete_vote(
    app_data: web::Data<AppData>,
    path_id: web::Path<i64>,
    request: HttpRequest,
) -> Result<HttpResponse, PollError> {
    let voter = match voter_id(&request) {
        Some(voter) => voter,
        None => {
            log::error!("request carries neither a voter id nor a peer address");
            return Ok(HttpResponse::InternalServerError().json(Message("internal server error")));
        }
    };
    let tally = app_data
        .engine
        .cancel_vote(PollId(path_id.into_inner()), &voter)
        .await?;
    Ok(HttpResponse::Ok().json(tally))
}

pub fn configure_routes(config: &mut ServiceConfig) {
    config.route("/{id}/vote", web::post().to(post_vote));
    config.route("/{id}/vote", web::delete().to(delete_vote));
}
