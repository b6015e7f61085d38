use actix_web::{
    web::{self, ServiceConfig},
    HttpResponse,
};

use crate::{
    error::PollError,
    form::Draft,
    models::Choice,
    AppData,
};

/// One submission of the poll form. The client resends everything accepted
/// so far, so no draft is kept between requests.
#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct DraftPostRequestData {
    question: String,
    #[serde(default)]
    submitted: Vec<String>,
    #[serde(default)]
    new_choices: Vec<String>,
    #[serde(default)]
    finalize: bool,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct DraftPreview<'a> {
    question: &'a str,
    choices: Vec<&'a Choice>,
    batch_size: usize,
}

async fn post_draft(
    app_data: web::Data<AppData>,
    draft_request: web::Json<DraftPostRequestData>,
) -> Result<HttpResponse, PollError> {
    let request_data = draft_request.into_inner();
    let forms = &app_data.forms;

    let mut draft = Draft::new();
    forms.submit_all(&mut draft, request_data.submitted.as_slice())?;
    forms.submit_batch(&mut draft, request_data.new_choices.as_slice())?;

    if request_data.finalize {
        let poll = forms
            .finalize(&app_data.engine, draft, &request_data.question)
            .await?;
        return Ok(HttpResponse::Created().json(poll));
    }

    Ok(HttpResponse::Ok().json(DraftPreview {
        question: &request_data.question,
        choices: draft.choices().collect(),
        batch_size: forms.batch_size(),
    }))
}

pub fn configure_routes(config: &mut ServiceConfig) {
    config.route("", web::post().to(post_draft));
}
