mod common;

use axum::{body::Body, http::Method};
use common::{body_bytes, json_body, local_uri, request, setup};
use council_storage::models::policy::{AccessPolicy, AclRule, ObjectPermission};
use serde_json::json;

async fn issue(env: &common::TestEnv, uri: &str) -> serde_json::Value {
    let (status, body) = env
        .json(request(Method::POST, uri).body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, 200, "{body}");
    body
}

async fn put_signed(env: &common::TestEnv, url: &str, payload: &'static str) -> u16 {
    env.send(
        request(Method::PUT, local_uri(url))
            .header("content-type", "application/pdf")
            .body(Body::from(payload))
            .unwrap(),
    )
    .await
    .status()
    .as_u16()
}

#[tokio::test]
async fn document_upload_is_private_until_granted() {
    let env = setup().await;

    let session = issue(&env, "/api/documents/upload-url").await;
    let url = session["uploadURL"].as_str().unwrap().to_string();
    let object_path = session["objectPath"].as_str().unwrap().to_string();
    assert!(object_path.starts_with("/objects/.private/documents/"));

    assert_eq!(put_signed(&env, &url, "%PDF-1.7 ata").await, 200);
    // Upload URLs are single use.
    assert_eq!(put_signed(&env, &url, "again").await, 409);

    let (status, body) = env
        .json(
            request(Method::PUT, "/api/objects/set-file")
                .header("content-type", "application/json")
                .header("x-user-id", "42")
                .body(json_body(json!({
                    "fileURL": url,
                    "entityType": "document",
                    "entityId": "7",
                })))
                .unwrap(),
        )
        .await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["objectPath"], object_path);

    // Owner has no implicit access; anonymous is denied too.
    for headers in [vec![("x-user-id", "42")], vec![]] {
        let mut req = request(Method::GET, &object_path);
        for (k, v) in headers {
            req = req.header(k, v);
        }
        let resp = env.send(req.body(Body::empty()).unwrap()).await;
        assert_eq!(resp.status(), 403);
    }

    // Default private policy grants administrators read access.
    let resp = env
        .send(
            request(Method::GET, &object_path)
                .header("x-user-id", "1")
                .header("x-user-groups", "staff, admin")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["cache-control"], "private, max-age=300");
    assert_eq!(resp.headers()["content-type"], "application/pdf");
    assert_eq!(body_bytes(resp).await, "%PDF-1.7 ata");

    // The same object is not reachable through the public route.
    let public = object_path.replacen("/objects/", "/public-objects/", 1);
    let resp = env.send(request(Method::GET, &public).body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn private_policy_without_rules_denies_everyone() {
    let env = setup().await;
    let session = issue(&env, "/api/documents/upload-url").await;
    let url = session["uploadURL"].as_str().unwrap();
    assert_eq!(put_signed(&env, url, "secret").await, 200);

    let object = env.state.backend.resolve_upload_url(url).unwrap();
    env.state
        .acl
        .set_policy(&object, &AccessPolicy::private("42", vec![]))
        .await
        .unwrap();

    let path = session["objectPath"].as_str().unwrap();
    for (id, groups) in [("42", ""), ("1", "admin"), ("7", "staff")] {
        let resp = env
            .send(
                request(Method::GET, path)
                    .header("x-user-id", id)
                    .header("x-user-groups", groups)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(resp.status(), 403, "principal {id}");
    }
}

#[tokio::test]
async fn avatar_upload_is_served_publicly() {
    let env = setup().await;
    let session = issue(&env, "/api/avatars/upload-url").await;
    let url = session["uploadURL"].as_str().unwrap();
    assert_eq!(put_signed(&env, url, "png").await, 200);

    let (status, body) = env
        .json(
            request(Method::PUT, "/api/objects/set-file")
                .header("content-type", "application/json")
                .body(json_body(json!({ "fileURL": url, "entityType": "avatar" })))
                .unwrap(),
        )
        .await;
    assert_eq!(status, 200, "{body}");
    let path = body["objectPath"].as_str().unwrap();
    assert!(path.starts_with("/public-objects/public/avatars/"), "{path}");
    assert_eq!(body["objectPath"], session["objectPath"]);

    let resp = env.send(request(Method::GET, path).body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["cache-control"], "public, max-age=300");
    assert_eq!(body_bytes(resp).await, "png");

    let object = env.state.backend.resolve_upload_url(url).unwrap();
    let policy = env.state.acl.get_policy(&object).await.unwrap().unwrap();
    assert_eq!(policy.owner, "system");
}

#[tokio::test]
async fn explicit_rules_grant_named_users() {
    let env = setup().await;
    let session = issue(&env, "/api/activities/upload-url").await;
    let url = session["uploadURL"].as_str().unwrap();
    assert_eq!(put_signed(&env, url, "draft").await, 200);

    let object = env.state.backend.resolve_upload_url(url).unwrap();
    let policy = AccessPolicy::private(
        "system",
        vec![AclRule::new("user", "99", ObjectPermission::Write)],
    );
    env.state.acl.set_policy(&object, &policy).await.unwrap();
    // Re-setting the same policy leaves it as it was.
    env.state.acl.set_policy(&object, &policy).await.unwrap();
    assert_eq!(env.state.acl.get_policy(&object).await.unwrap(), Some(policy));

    let path = session["objectPath"].as_str().unwrap();
    let resp = env
        .send(
            request(Method::GET, path)
                .header("x-user-id", "99")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), 200);
}

async fn set_file(
    env: &common::TestEnv,
    caller: Option<(&str, &str)>,
    body: serde_json::Value,
) -> (u16, serde_json::Value) {
    let mut req = request(Method::PUT, "/api/objects/set-file").header("content-type", "application/json");
    if let Some((id, groups)) = caller {
        req = req.header("x-user-id", id).header("x-user-groups", groups);
    }
    env.json(req.body(json_body(body)).unwrap()).await
}

#[tokio::test]
async fn stamped_policy_cannot_be_replaced_without_write_access() {
    let env = setup().await;
    let session = issue(&env, "/api/documents/upload-url").await;
    let url = session["uploadURL"].as_str().unwrap();
    let object_path = session["objectPath"].as_str().unwrap();
    assert_eq!(put_signed(&env, url, "SECRET").await, 200);

    let (status, _) = set_file(&env, Some(("42", "")), json!({ "fileURL": url, "entityType": "document" })).await;
    assert_eq!(status, 200);

    // Without a write grant nobody flips the document to public, owner included.
    for caller in [None, Some(("42", "")), Some(("7", "staff"))] {
        for target in [url, object_path] {
            let (status, body) =
                set_file(&env, caller, json!({ "fileURL": target, "visibility": "public" })).await;
            assert_eq!(status, 403, "{caller:?} {target}: {body}");
        }
    }

    let public = object_path.replacen("/objects/", "/public-objects/", 1);
    let resp = env.send(request(Method::GET, &public).body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), 404);
    let object = env.state.backend.resolve_upload_url(url).unwrap();
    let policy = env.state.acl.get_policy(&object).await.unwrap().unwrap();
    assert_eq!(policy.owner, "42");
    assert_eq!(policy.acl_rules, vec![AclRule::admin_read()]);

    // Administrators may re-stamp.
    let (status, body) =
        set_file(&env, Some(("1", "admin")), json!({ "fileURL": object_path, "visibility": "public" })).await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["objectPath"], public);
}

#[tokio::test]
async fn write_grant_allows_replacing_the_policy() {
    let env = setup().await;
    let session = issue(&env, "/api/activities/upload-url").await;
    let url = session["uploadURL"].as_str().unwrap();
    assert_eq!(put_signed(&env, url, "draft").await, 200);

    let object = env.state.backend.resolve_upload_url(url).unwrap();
    let policy = AccessPolicy::private(
        "system",
        vec![
            AclRule::new("user", "99", ObjectPermission::Write),
            AclRule::new("user", "5", ObjectPermission::Read),
        ],
    );
    env.state.acl.set_policy(&object, &policy).await.unwrap();

    let (status, _) = set_file(&env, Some(("5", "")), json!({ "fileURL": url, "entityType": "activity" })).await;
    assert_eq!(status, 403);

    let (status, body) =
        set_file(&env, Some(("99", "")), json!({ "fileURL": url, "entityType": "activity" })).await;
    assert_eq!(status, 200, "{body}");
    let replaced = env.state.acl.get_policy(&object).await.unwrap().unwrap();
    assert_eq!(replaced.owner, "99");
    assert_eq!(replaced.acl_rules, vec![AclRule::admin_read()]);
}

#[tokio::test]
async fn generic_upload_defaults_to_documents() {
    let env = setup().await;
    let session = issue(&env, "/api/objects/upload").await;
    assert!(
        session["objectPath"]
            .as_str()
            .unwrap()
            .starts_with("/objects/.private/documents/")
    );

    let (status, session) = env
        .json(
            request(Method::POST, "/api/objects/upload")
                .header("content-type", "application/json")
                .body(json_body(json!({ "category": "news" })))
                .unwrap(),
        )
        .await;
    assert_eq!(status, 200);
    assert!(
        session["objectPath"]
            .as_str()
            .unwrap()
            .starts_with("/public-objects/public/news/")
    );

    let (status, _) = env
        .json(
            request(Method::POST, "/api/objects/upload")
                .header("content-type", "application/json")
                .body(json_body(json!({ "category": "minutes" })))
                .unwrap(),
        )
        .await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn tampered_or_unknown_uploads_are_rejected() {
    let env = setup().await;
    let session = issue(&env, "/api/news/upload-url").await;
    let url = session["uploadURL"].as_str().unwrap();
    let tampered = url.replace("/public/news/", "/public/avatars/");
    assert_eq!(put_signed(&env, &tampered, "x").await, 403);

    // set-file on an object that was never written.
    let (status, _) = env
        .json(
            request(Method::PUT, "/api/objects/set-file")
                .header("content-type", "application/json")
                .body(json_body(json!({ "fileURL": url })))
                .unwrap(),
        )
        .await;
    assert_eq!(status, 404);

    let missing = env
        .send(
            request(Method::GET, "/objects/.private/documents/nothing-here")
                .header("x-user-id", "1")
                .header("x-user-groups", "admin")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(missing.status(), 404);
}

#[tokio::test]
async fn health_endpoints_report_ok() {
    let env = setup().await;
    let (status, body) = env
        .json(request(Method::GET, "/healthz").body(Body::empty()).unwrap())
        .await;
    assert_eq!((status, body["status"].as_str()), (200, Some("ok")));

    let (status, body) = env
        .json(request(Method::GET, "/readyz").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["checks"]["sqlite"]["ok"], true);
    assert_eq!(body["checks"]["object_storage"]["ok"], true);
}
