use actix_web::{
    web::{self, ServiceConfig},
    HttpResponse,
};
use anyhow::Result;
use plotters::prelude::*;

use crate::{
    error::PollError,
    models::{ChoiceCount, Message, PollId},
    AppData,
};

async fn get_polls(app_data: web::Data<AppData>) -> Result<HttpResponse, PollError> {
    let polls = app_data.engine.list_polls().await?;
    Ok(HttpResponse::Ok().json(polls))
}

#[derive(serde::Deserialize)]
struct LookupQuery {
    question: String,
}

/// First poll asking exactly this question.
async fn lookup_poll(
    app_data: web::Data<AppData>,
    query: web::Query<LookupQuery>,
) -> Result<HttpResponse, PollError> {
    let poll = app_data.engine.find_by_question(&query.question).await?;
    Ok(HttpResponse::Ok().json(poll))
}

async fn get_poll(
    app_data: web::Data<AppData>,
    path_id: web::Path<i64>,
) -> Result<HttpResponse, PollError> {
    let poll = app_data
        .engine
        .get_poll(PollId(path_id.into_inner()))
        .await?;
    Ok(HttpResponse::Ok().json(poll))
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct PollPostRequestData {
    question: String,
    choices: Vec<String>,
}

async fn post_poll(
    app_data: web::Data<AppData>,
    poll: web::Json<PollPostRequestData>,
) -> Result<HttpResponse, PollError> {
    let request_data = poll.into_inner();
    let poll = app_data
        .engine
        .create_poll(&request_data.question, request_data.choices)
        .await?;
    Ok(HttpResponse::Created().json(poll))
}

async fn delete_poll(
    app_data: web::Data<AppData>,
    path_id: web::Path<i64>,
) -> Result<HttpResponse, PollError> {
    app_data
        .engine
        .delete_poll(PollId(path_id.into_inner()))
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

async fn get_poll_votes(
    app_data: web::Data<AppData>,
    path_id: web::Path<i64>,
) -> Result<HttpResponse, PollError> {
    let tally = app_data.engine.tally(PollId(path_id.into_inner())).await?;
    Ok(HttpResponse::Ok().json(tally))
}

async fn get_poll_statistics(
    app_data: web::Data<AppData>,
    path_id: web::Path<i64>,
) -> Result<HttpResponse, PollError> {
    let statistics = app_data
        .engine
        .statistics(PollId(path_id.into_inner()))
        .await?;
    Ok(HttpResponse::Ok().json(statistics))
}

const COLORS: &[&RGBColor] = &[&RED, &GREEN, &BLUE, &YELLOW, &CYAN, &MAGENTA];

const fn get_color(index: usize) -> &'static RGBColor {
    COLORS[index % COLORS.len()]
}

// bars run top to bottom in display order
fn draw_bar_graph(caption: &str, data: &[ChoiceCount]) -> Result<String> {
    let mut buffer = String::new();

    let data_len = data.len();

    let svg_backend = SVGBackend::with_string(&mut buffer, (600, 400));
    let root_area = svg_backend.into_drawing_area();
    root_area.fill(&WHITE)?;

    // an empty axis cannot be drawn
    let max_count = data.iter().map(|x| x.count).max().unwrap_or(0).max(1);

    let mut context = ChartBuilder::on(&root_area)
        .set_label_area_size(LabelAreaPosition::Left, 40)
        // keeps the rightmost number on the x axis from being cut off
        .set_label_area_size(LabelAreaPosition::Right, 5)
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .caption(caption, ("sans-serif", 40))
        // -1 because the upper bound is included, even though the range is exclusive
        .build_cartesian_2d(0..max_count, (0..data_len - 1).into_segmented())?;

    context
        .configure_mesh()
        .y_label_formatter(&|x| match x {
            SegmentValue::CenterOf(x) => data[data_len - *x - 1].choice_text.clone(),
            _ => "".to_string(),
        })
        .draw()?;

    let data_values = data.iter().map(|x| x.count);

    context.draw_series((0..).zip(data_values).map(|(y, x)| {
        let reversed_y = data_len - y - 1;
        let mut bar = Rectangle::new(
            [
                (0, SegmentValue::Exact(reversed_y)),
                (x, SegmentValue::Exact(reversed_y + 1)),
            ],
            get_color(y).filled(),
        );
        bar.set_margin(5, 5, 0, 0);
        bar
    }))?;

    // as along as these are alive, they are still borrowing buffer
    // and it can't be returned
    drop(context);
    drop(root_area);

    Ok(buffer)
}

async fn get_poll_graph(
    app_data: web::Data<AppData>,
    path_id: web::Path<i64>,
) -> Result<HttpResponse, PollError> {
    let poll = app_data
        .engine
        .get_poll(PollId(path_id.into_inner()))
        .await?;
    let svg_content = unwrap_or_log_and_internal_server_error_response!(
        draw_bar_graph(poll.question(), &poll.tally()),
        "internal server error"
    );
    Ok(HttpResponse::Ok()
        .content_type("image/svg+xml")
        .body(svg_content))
}

pub fn configure_routes(config: &mut ServiceConfig) {
    config.route("", web::get().to(get_polls));
    config.route("", web::post().to(post_poll));
    // has to come before "/{id}", which would swallow it
    config.route("/lookup", web::get().to(lookup_poll));
    config.route("/{id}", web::get().to(get_poll));
    config.route("/{id}", web::delete().to(delete_poll));
    config.route("/{id}/graph", web::get().to(get_poll_graph));
    config.route("/{id}/votes", web::get().to(get_poll_votes));
    config.route("/{id}/statistics", web::get().to(get_poll_statistics));
}

#[cfg(test)]
mod tests {
    use crate::routes::testing::{app_data, test_app};
    use actix_web::http::StatusCode;
    use actix_web::test::{
        call_and_read_body_json, call_service, read_body, read_body_json, TestRequest,
    };
    use serde_json::{json, Value};

    fn create(question: &str, choices: &[&str]) -> TestRequest {
        TestRequest::post()
            .uri("/polls")
            .set_json(json!({ "question": question, "choices": choices }))
    }

    #[actix_web::test]
    async fn create_and_fetch_poll() {
        let app_data = app_data();
        let app = test_app!(app_data);

        let request = create("Best color?", &["Red", "Blue", "Green"]).to_request();
        let response = call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: Value = read_body_json(response).await;
        let id = created["id"].as_i64().unwrap();
        assert_eq!(created["choices"][2]["text"], "Green");
        assert_eq!(created["choices"][2]["weight"], 2);
        assert_eq!(created["locked"], false);

        let fetched: Value = call_and_read_body_json(
            &app,
            TestRequest::get().uri(&format!("/polls/{}/", id)).to_request(),
        )
        .await;
        assert_eq!(fetched["question"], "Best color?");

        let found: Value = call_and_read_body_json(
            &app,
            TestRequest::get()
                .uri("/polls/lookup?question=Best%20color%3F")
                .to_request(),
        )
        .await;
        assert_eq!(found["id"], id);

        let all: Value =
            call_and_read_body_json(&app, TestRequest::get().uri("/polls").to_request()).await;
        assert_eq!(all.as_array().map(Vec::len), Some(1));
    }

    #[actix_web::test]
    async fn invalid_poll_is_a_bad_request() {
        let app_data = app_data();
        let app = test_app!(app_data);
        let response = call_service(&app, create("Lonely?", &["only", ""]).to_request()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = read_body_json(response).await;
        assert!(body["message"].as_str().unwrap().starts_with("invalid poll"));
    }

    #[actix_web::test]
    async fn unknown_poll_is_not_found() {
        let app_data = app_data();
        let app = test_app!(app_data);
        for uri in ["/polls/42", "/polls/42/votes", "/polls/42/statistics", "/polls/42/graph"] {
            let response = call_service(&app, TestRequest::get().uri(uri).to_request()).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
        }
        let response = call_service(
            &app,
            TestRequest::get().uri("/polls/lookup?question=nope").to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn delete_is_idempotent() {
        let app_data = app_data();
        let app = test_app!(app_data);
        let poll = app_data.engine.create_poll("q", ["a", "b"]).await.unwrap();
        for _ in 0..2 {
            let response = call_service(
                &app,
                TestRequest::delete()
                    .uri(&format!("/polls/{}", poll.id()))
                    .to_request(),
            )
            .await;
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }
        assert!(app_data.engine.get_poll(poll.id()).await.is_err());
    }

    #[actix_web::test]
    async fn graph_is_svg() {
        let app_data = app_data();
        let app = test_app!(app_data);
        let poll = app_data
            .engine
            .create_poll("Best color?", ["Red", "Blue"])
            .await
            .unwrap();
        let response = call_service(
            &app,
            TestRequest::get()
                .uri(&format!("/polls/{}/graph", poll.id()))
                .to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "image/svg+xml"
        );
        let body = read_body(response).await;
        assert!(String::from_utf8_lossy(&body).contains("<svg"));
    }
}
