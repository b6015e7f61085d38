use actix_web::{
    web::{self, ServiceConfig},
    HttpResponse,
};

use crate::{
    error::PollError,
    models::{ChoiceId, PollId},
    AppData,
};

#[derive(serde::Deserialize)]
struct ChoicePostRequestData {
    text: String,
}

async fn post_choice(
    app_data: web::Data<AppData>,
    path_id: web::Path<i64>,
    choice: web::Json<ChoicePostRequestData>,
) -> Result<HttpResponse, PollError> {
    let choice = app_data
        .engine
        .add_choice(PollId(path_id.into_inner()), &choice.text)
        .await?;
    Ok(HttpResponse::Created().json(choice))
}

#[derive(serde::Deserialize)]
struct ChoicePutRequestData {
    text: Option<String>,
    weight: Option<i32>,
}

/// Renames and/or moves a choice. Renaming is refused once voting has started.
async fn put_choice(
    app_data: web::Data<AppData>,
    path: web::Path<(i64, i32)>,
    update: web::Json<ChoicePutRequestData>,
) -> Result<HttpResponse, PollError> {
    let (poll_id, choice_id) = path.into_inner();
    let update = update.into_inner();
    let choice = app_data
        .engine
        .update_choice(
            PollId(poll_id),
            ChoiceId(choice_id),
            update.text.as_deref(),
            update.weight,
        )
        .await?;
    Ok(HttpResponse::Ok().json(choice))
}

pub fn configure_routes(config: &mut ServiceConfig) {
    config.route("/{id}/choices", web::post().to(post_choice));
    config.route("/{id}/choices/{choice_id}", web::put().to(put_choice));
}
