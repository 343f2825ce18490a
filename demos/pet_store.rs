//! Example describing a small REST API with operation specs.
//!
//! This example shows how to:
//! - Register model mappers once and share them between operations
//! - Describe GET, POST and HEAD operations with path, query and body parameters
//! - Read flattened and typed responses
//! - Inspect HTTP errors with their mapped details
//!
//! Run with: `cargo run --example pet_store`

use http::Method;
use restline::mapper::{CompositeMapper, Mapper, MapperRegistry};
use restline::operation::{OperationParameter, OperationResponseSpec};
use restline::serializer::Serializer;
use restline::{Error, OperationArguments, OperationSpec, ServiceClient};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Post {
    user_id: u32,
    id: u32,
    title: String,
    body: String,
}

#[derive(Debug, Serialize)]
struct NewPost {
    title: String,
    body: String,
    user_id: u32,
}

fn registry() -> Result<MapperRegistry, Error> {
    let post = Mapper::composite(
        CompositeMapper::new("Post")
            .property("user_id", Mapper::number().named("userId"))
            .property("id", Mapper::number().named("id"))
            .property("title", Mapper::string().named("title").required())
            .property("body", Mapper::string().named("body")),
    )
    .named("Post");
    MapperRegistry::builder().mapper("Post", post).build()
}

struct Operations {
    get_post: OperationSpec,
    list_posts: OperationSpec,
    create_post: OperationSpec,
    post_exists: OperationSpec,
}

fn operations(serializer: Serializer) -> Operations {
    let post_id = OperationParameter::new("postId", Mapper::number().named("postId").required());

    Operations {
        get_post: OperationSpec::new(Method::GET, serializer.clone())
            .path("/posts/{postId}")
            .url_parameter(post_id.clone())
            .response(200, OperationResponseSpec::new().body(Mapper::reference("Post")))
            .default_response(OperationResponseSpec::new().body(Mapper::any()).error()),
        list_posts: OperationSpec::new(Method::GET, serializer.clone())
            .path("/posts")
            .query_parameter(OperationParameter::new("userId", Mapper::number().named("userId")))
            .response(
                200,
                OperationResponseSpec::new().body(Mapper::sequence(Mapper::reference("Post"))),
            ),
        create_post: OperationSpec::new(Method::POST, serializer.clone())
            .path("/posts")
            .request_body(OperationParameter::new("post", Mapper::reference("Post").required()))
            .response(201, OperationResponseSpec::new().body(Mapper::reference("Post"))),
        post_exists: OperationSpec::new(Method::HEAD, serializer)
            .path("/posts/{postId}")
            .url_parameter(post_id)
            .response(200, OperationResponseSpec::new())
            .response(404, OperationResponseSpec::new()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_env_filter("restline=debug,pet_store=info")
        .init();

    let serializer = Serializer::new(Arc::new(registry()?), false);
    let ops = operations(serializer);

    let client = ServiceClient::builder()
        .base_uri("https://jsonplaceholder.typicode.com")?
        .request_content_type("application/json; charset=utf-8")
        .build()?;

    println!("=== Typed GET ===");
    let post = client
        .send_operation_request_as::<Post>(OperationArguments::new().with("postId", 1)?, &ops.get_post)
        .await?;
    println!("Post {}: {}", post.data.id, post.data.title);
    println!("Request latency: {:?}", post.latency);
    println!();

    println!("=== Query parameters ===");
    let posts = client
        .send_operation_request_as::<Vec<Post>>(
            OperationArguments::new().with("userId", 2)?,
            &ops.list_posts,
        )
        .await?;
    println!("User 2 wrote {} posts", posts.data.len());
    println!();

    println!("=== POST with a mapped body ===");
    let new_post = NewPost {
        title: "Mapped".to_string(),
        body: "Sent through the serialization policy".to_string(),
        user_id: 1,
    };
    let created = client
        .send_operation_request(OperationArguments::new().with("post", new_post)?, &ops.create_post)
        .await?;
    println!("Created: {}", created.data);
    println!("Content-Type: {:?}", created.header("content-type"));
    println!();

    println!("=== HEAD ===");
    for id in [1, 100_000] {
        let exists = client
            .send_operation_request(OperationArguments::new().with("postId", id)?, &ops.post_exists)
            .await?;
        println!("Post {} exists: {}", id, exists.data["body"]);
    }
    println!();

    println!("=== Error handling ===");
    match client
        .send_operation_request(OperationArguments::new().with("postId", 100_000)?, &ops.get_post)
        .await
    {
        Ok(response) => println!("Unexpected success: {}", response.data),
        Err(e @ Error::Http { .. }) => {
            println!("HTTP {:?}: {}", e.status(), e);
            println!("Details: {:?}", e.details());
        }
        Err(e) => println!("Other error: {}", e),
    }

    Ok(())
}
