use std::io;

use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    constants::{DEFAULT_BLUR_AMOUNT, DEFAULT_JPEG_QUALITY, FILES_PER_PAGE},
    error::{AppError, AppResult},
    handlers::number_field,
    models::{
        image::{self, NewImage, Tool},
        page_offset, pack, preset, session,
    },
    server::ServerState,
    util::{
        archive::build_zip,
        audit,
        auth::CurrentUser,
        image::{
            blur_borders, compress, delete_pending, format_file_size, image_info, mime_type_for,
            process_pack, read_pending, resize, save_pending, validate_image, CompressMode,
            ProcessingError, ResizeMode,
        },
        security::{sanitize_filename, split_extension, ClientInfo},
    },
};

#[derive(Deserialize)]
pub struct BlurForm {
    width: Option<String>,
    height: Option<String>,
    blur_amount: Option<String>,
    custom_filename: Option<String>,
}

#[derive(Deserialize)]
pub struct CompressForm {
    compress_mode: Option<String>,
    quality: Option<String>,
    target_size_kb: Option<String>,
    custom_filename: Option<String>,
}

#[derive(Deserialize)]
pub struct ResizeForm {
    resize_method: Option<String>,
    percentage: Option<String>,
    max_width: Option<String>,
    max_height: Option<String>,
    width: Option<String>,
    height: Option<String>,
    custom_filename: Option<String>,
}

#[derive(Deserialize)]
pub struct PackForm {
    pack_id: Option<String>,
}

#[derive(Deserialize)]
pub struct FilesQuery {
    page: Option<i64>,
    search: Option<String>,
    tool: Option<String>,
}

fn custom_name(custom: Option<&str>) -> Option<String> {
    custom
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(sanitize_filename)
}

fn preview(data: &[u8], filename: &str) -> String {
    format!(
        "data:{};base64,{}",
        mime_type_for(filename),
        STANDARD.encode(data)
    )
}

/// The session's staged upload as `(bytes, original filename)`.
async fn staged_upload(state: &ServerState, current: &CurrentUser) -> AppResult<(Vec<u8>, String)> {
    let missing = || AppError::bad_request("No file uploaded");
    let (uuid, filename) = current.session.pending().ok_or_else(missing)?;

    match read_pending(&state.config.data_dir, uuid).await {
        Ok(data) => Ok((data, filename.to_owned())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Err(missing()),
        Err(err) => Err(err.into()),
    }
}

/// Fails with `StorageLimitExceeded` if `additional` bytes would exceed the user's quota.
async fn ensure_quota(state: &ServerState, current: &CurrentUser, additional: usize) -> AppResult<()> {
    let settings = state.settings().await?;
    let Some(quota) = current
        .user
        .storage_quota(settings.default_storage_limit_bytes)
    else {
        return Ok(());
    };

    let used = image::totals(&state.pool, Some(current.user.id)).await?.size;
    if used + additional as i64 > quota {
        log::warn!(
            "User '{}' exceeded storage limit ({} of {} used)",
            current.user.username,
            format_file_size(used.max(0) as u64),
            format_file_size(quota.max(0) as u64)
        );
        return Err(AppError::StorageLimitExceeded);
    }
    Ok(())
}

async fn run_blocking<T, F>(task: F) -> AppResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ProcessingError> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| AppError::Internal(format!("Processing task failed: {}", err)))?
        .map_err(AppError::from)
}

fn attachment(data: Vec<u8>, content_type: &str, filename: &str) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_owned()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={:?}", filename),
            ),
        ],
        Body::from(data),
    )
        .into_response()
}

pub async fn app_handler(
    State(state): State<ServerState>,
    current: CurrentUser,
) -> AppResult<Json<Value>> {
    let presets = preset::list_active(&state.pool).await?;
    let packs = pack::list_active(&state.pool).await?;

    Ok(Json(json!({
        "user": current.user,
        "presets": presets,
        "packs": packs,
        "staged_upload": current.session.pending().map(|(_, filename)| filename),
    })))
}

/// Stages the multipart field `file` for the processing tools.
pub async fn upload_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    current: CurrentUser,
    mut multipart: Multipart,
) -> AppResult<Json<Value>> {
    state.rate_limit("upload", &client, 100).await?;

    let mut upload = None;
    loop {
        let field = match multipart.next_field().await {
            Err(err) => {
                log::error!("{}", err.body_text());
                if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
                    return Err(AppError::PayloadTooLarge(
                        "File too large. Please upload a smaller image.".to_owned(),
                    ));
                }
                return Err(AppError::bad_request("No file provided"));
            }
            Ok(None) => break,
            Ok(Some(field)) => field,
        };
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_owned();
        let data = match field.bytes().await {
            Err(err) => {
                log::error!("{}", err.body_text());
                return Err(match err.status() {
                    StatusCode::PAYLOAD_TOO_LARGE => AppError::PayloadTooLarge(
                        "File too large. Please upload a smaller image.".to_owned(),
                    ),
                    _ => AppError::bad_request("An error occurred while reading the upload"),
                });
            }
            Ok(data) => data,
        };
        upload = Some((filename, data));
        break;
    }

    let (filename, data) = upload.ok_or_else(|| AppError::bad_request("No file provided"))?;
    if filename.is_empty() {
        return Err(AppError::bad_request("No file selected"));
    }
    let filename = sanitize_filename(&filename);
    log::info!("Received '{}' with size {}B", filename, data.len());

    let settings = state.settings().await?;
    let info = {
        let data = data.clone();
        let filename = filename.clone();
        run_blocking(move || {
            validate_image(
                &data,
                &filename,
                settings.max_file_size,
                &settings.allowed_extensions,
            )?;
            image_info(&data)
        })
        .await?
    };

    let uuid = save_pending(&state.config.data_dir, &data).await?;
    if let Some(previous) =
        session::set_pending(&state.pool, &current.session.token, uuid, &filename).await?
    {
        if let Err(err) = delete_pending(&state.config.data_dir, previous).await {
            log::warn!("Could not remove replaced upload {}: {}", previous, err);
        }
    }

    audit::record(
        &state.pool,
        Some(&current.user),
        &client,
        "IMAGE_UPLOADED",
        &format!(
            "Uploaded {} ({}x{}, {})",
            filename,
            info.width,
            info.height,
            format_file_size(info.size as u64)
        ),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "filename": filename,
        "info": info,
    })))
}

pub async fn blur_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    current: CurrentUser,
    Form(form): Form<BlurForm>,
) -> AppResult<Json<Value>> {
    state.rate_limit("process_blur", &client, 50).await?;
    let (data, original_filename) = staged_upload(&state, &current).await?;

    let width = number_field("width", form.width.as_deref(), 1080u32)?;
    let height = number_field("height", form.height.as_deref(), 1080u32)?;
    let blur_amount = number_field(
        "blur_amount",
        form.blur_amount.as_deref(),
        DEFAULT_BLUR_AMOUNT,
    )?;

    let processed = run_blocking(move || blur_borders(&data, width, height, blur_amount)).await?;

    let filename = match custom_name(form.custom_filename.as_deref()) {
        Some(custom) => format!("{}.png", custom),
        None => format!(
            "{}-blur-{}x{}.png",
            split_extension(&original_filename).0,
            width,
            height
        ),
    };

    ensure_quota(&state, &current, processed.len()).await?;
    let image_id = image::insert(
        &state.pool,
        &NewImage {
            user_id: current.user.id,
            pack_id: None,
            original_filename: &original_filename,
            saved_filename: &filename,
            tool: Tool::Blur,
            width,
            height,
            data: &processed,
        },
    )
    .await?;

    audit::image_event(
        &current.user,
        "BLUR",
        &format!(
            "Processed {} to {} ({}x{}, blur={})",
            original_filename, filename, width, height, blur_amount
        ),
    );

    Ok(Json(json!({
        "success": true,
        "image_id": image_id,
        "filename": filename,
        "preview": preview(&processed, &filename),
        "size": format_file_size(processed.len() as u64),
        "dimensions": format!("{} × {}", width, height),
    })))
}

pub async fn compress_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    current: CurrentUser,
    Form(form): Form<CompressForm>,
) -> AppResult<Json<Value>> {
    state.rate_limit("process_compress", &client, 50).await?;
    let (data, original_filename) = staged_upload(&state, &current).await?;

    let mode = match form.compress_mode.as_deref().unwrap_or("quality") {
        "target_size" => CompressMode::TargetSize {
            kilobytes: number_field("target_size_kb", form.target_size_kb.as_deref(), 500u64)?,
        },
        "quality" => CompressMode::Quality(number_field(
            "quality",
            form.quality.as_deref(),
            DEFAULT_JPEG_QUALITY,
        )?),
        other => {
            return Err(AppError::bad_request(format!(
                "Unknown compression mode: {}",
                other
            )))
        }
    };

    let original_size = data.len();
    let (compressed, (width, height)) = run_blocking(move || {
        let compressed = compress(&data, mode)?;
        let info = image_info(&compressed.data)?;
        Ok((compressed, (info.width, info.height)))
    })
    .await?;

    let filename = match custom_name(form.custom_filename.as_deref()) {
        Some(custom) => format!("{}.jpg", custom),
        None => format!(
            "{}-compressed-{}kb.jpg",
            split_extension(&original_filename).0,
            compressed.size / 1024
        ),
    };

    ensure_quota(&state, &current, compressed.size).await?;
    let image_id = image::insert(
        &state.pool,
        &NewImage {
            user_id: current.user.id,
            pack_id: None,
            original_filename: &original_filename,
            saved_filename: &filename,
            tool: Tool::Compress,
            width,
            height,
            data: &compressed.data,
        },
    )
    .await?;

    let space_saved = original_size as i64 - compressed.size as i64;
    let percent_saved = if original_size > 0 {
        (space_saved as f64 / original_size as f64 * 1000.0).round() / 10.0
    } else {
        0.0
    };

    audit::image_event(
        &current.user,
        "COMPRESS",
        &format!(
            "Compressed {} to {} ({}, {}% reduction)",
            original_filename,
            filename,
            format_file_size(compressed.size as u64),
            percent_saved
        ),
    );

    Ok(Json(json!({
        "success": true,
        "image_id": image_id,
        "filename": filename,
        "preview": preview(&compressed.data, &filename),
        "original_size": format_file_size(original_size as u64),
        "compressed_size": format_file_size(compressed.size as u64),
        "space_saved": if space_saved >= 0 {
            format_file_size(space_saved as u64)
        } else {
            format!("-{}", format_file_size(space_saved.unsigned_abs()))
        },
        "percent_saved": format!("{}%", percent_saved),
        "quality": compressed.quality,
    })))
}

pub async fn resize_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    current: CurrentUser,
    Form(form): Form<ResizeForm>,
) -> AppResult<Json<Value>> {
    state.rate_limit("process_resize", &client, 50).await?;
    let (data, original_filename) = staged_upload(&state, &current).await?;

    let mode = match form.resize_method.as_deref().unwrap_or("percentage") {
        "percentage" => ResizeMode::Percentage(number_field(
            "percentage",
            form.percentage.as_deref(),
            50,
        )?),
        "max_dimension" => ResizeMode::MaxDimensions {
            max_width: Some(number_field("max_width", form.max_width.as_deref(), 1920)?),
            max_height: Some(number_field(
                "max_height",
                form.max_height.as_deref(),
                1080,
            )?),
        },
        "specific_size" => ResizeMode::Exact {
            width: number_field("width", form.width.as_deref(), 1080)?,
            height: number_field("height", form.height.as_deref(), 720)?,
        },
        other => {
            return Err(AppError::bad_request(format!(
                "Unknown resize method: {}",
                other
            )))
        }
    };

    let (original, resized) = run_blocking(move || {
        let original = image_info(&data)?;
        Ok((original, resize(&data, mode)?))
    })
    .await?;

    let filename = match custom_name(form.custom_filename.as_deref()) {
        Some(custom) => format!("{}.png", custom),
        None => format!(
            "{}-resized-{}x{}.png",
            split_extension(&original_filename).0,
            resized.width,
            resized.height
        ),
    };

    ensure_quota(&state, &current, resized.data.len()).await?;
    let image_id = image::insert(
        &state.pool,
        &NewImage {
            user_id: current.user.id,
            pack_id: None,
            original_filename: &original_filename,
            saved_filename: &filename,
            tool: Tool::Resize,
            width: resized.width,
            height: resized.height,
            data: &resized.data,
        },
    )
    .await?;

    audit::image_event(
        &current.user,
        "RESIZE",
        &format!(
            "Resized {} to {} ({}x{} → {}x{})",
            original_filename,
            filename,
            original.width,
            original.height,
            resized.width,
            resized.height
        ),
    );

    Ok(Json(json!({
        "success": true,
        "image_id": image_id,
        "filename": filename,
        "preview": preview(&resized.data, &filename),
        "original_dimensions": format!("{} × {}", original.width, original.height),
        "new_dimensions": format!("{} × {}", resized.width, resized.height),
        "size": format_file_size(resized.data.len() as u64),
    })))
}

/// File-name fragment for a pack output name.
fn output_slug(name: &str) -> String {
    sanitize_filename(&name.to_lowercase().replace([' ', '/', '\\'], "-"))
}

pub async fn pack_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    current: CurrentUser,
    Form(form): Form<PackForm>,
) -> AppResult<Json<Value>> {
    state.rate_limit("process_pack", &client, 30).await?;
    let (data, original_filename) = staged_upload(&state, &current).await?;

    let pack_id = form
        .pack_id
        .as_deref()
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .ok_or_else(|| AppError::bad_request("Invalid pack"))?;
    let pack = pack::find(&state.pool, pack_id)
        .await?
        .ok_or_else(|| AppError::not_found("Pack not found"))?;
    if !pack.is_active {
        return Err(AppError::bad_request("Pack is not active"));
    }
    let config = pack.parsed_config().map_err(|err| {
        log::error!("Pack '{}' has an invalid configuration: {}", pack.name, err);
        AppError::bad_request("Pack configuration is invalid")
    })?;

    let outputs = run_blocking(move || process_pack(&data, &config)).await?;

    let total: usize = outputs.iter().map(|output| output.data.len()).sum();
    ensure_quota(&state, &current, total).await?;

    let stem = split_extension(&original_filename).0.to_owned();
    let mut results = Vec::with_capacity(outputs.len());
    // A pack is stored completely or not at all
    let mut tx = state.pool.begin().await?;
    for output in &outputs {
        let filename = format!(
            "{}-{}-{}x{}.{}",
            stem,
            output_slug(&output.name),
            output.width,
            output.height,
            output.extension
        );
        let image_id = image::insert(
            &mut *tx,
            &NewImage {
                user_id: current.user.id,
                pack_id: Some(pack.id),
                original_filename: &original_filename,
                saved_filename: &filename,
                tool: Tool::Pack,
                width: output.width,
                height: output.height,
                data: &output.data,
            },
        )
        .await?;

        results.push(json!({
            "image_id": image_id,
            "name": output.name,
            "filename": filename,
            "preview": preview(&output.data, &filename),
            "dimensions": format!("{} × {}", output.width, output.height),
            "size": format_file_size(output.data.len() as u64),
        }));
    }
    tx.commit().await?;

    audit::image_event(
        &current.user,
        "PACK",
        &format!(
            "Processed pack '{}' for {} ({} outputs)",
            pack.name,
            original_filename,
            results.len()
        ),
    );

    Ok(Json(json!({
        "success": true,
        "pack_name": pack.name,
        "pack_icon": pack.icon,
        "results": results,
    })))
}

pub async fn my_files_handler(
    State(state): State<ServerState>,
    current: CurrentUser,
    Query(query): Query<FilesQuery>,
) -> AppResult<Json<Value>> {
    let (page, _) = page_offset(query.page, FILES_PER_PAGE);
    let search = query.search.as_deref().map(str::trim).unwrap_or_default();
    let tool = query
        .tool
        .as_deref()
        .filter(|tool| !tool.is_empty() && *tool != "all");

    let images = image::list_for_user(
        &state.pool,
        current.user.id,
        Some(search),
        tool,
        page,
        FILES_PER_PAGE,
    )
    .await?;
    let totals = image::totals(&state.pool, Some(current.user.id)).await?;

    Ok(Json(json!({
        "images": images,
        "total_images": totals.count,
        "total_size": totals.size,
        "total_size_display": format_file_size(totals.size.max(0) as u64),
        "search": search,
        "tool_filter": tool.unwrap_or_default(),
    })))
}

pub async fn download_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Response> {
    let image = image::find(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Image not found"))?;
    if image.user_id != current.user.id && !current.user.is_admin {
        return Err(AppError::forbidden(
            "You do not have permission to download this image",
        ));
    }

    audit::record(
        &state.pool,
        Some(&current.user),
        &client,
        "IMAGE_DOWNLOADED",
        &format!("Downloaded {}", image.saved_filename),
    )
    .await;

    let content_type = mime_type_for(&image.saved_filename);
    Ok(attachment(
        image.image_data,
        content_type,
        &image.saved_filename,
    ))
}

pub async fn download_pack_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    current: CurrentUser,
    Path(pack_id): Path<i64>,
) -> AppResult<Response> {
    let pack = pack::find(&state.pool, pack_id)
        .await?
        .ok_or_else(|| AppError::not_found("Pack not found"))?;
    let images = image::pack_for_user(&state.pool, current.user.id, pack_id).await?;
    if images.is_empty() {
        return Err(AppError::not_found("No images found for this pack"));
    }

    let archive = build_zip(
        images
            .iter()
            .map(|image| (image.saved_filename.as_str(), image.image_data.as_slice())),
    )?;

    audit::record(
        &state.pool,
        Some(&current.user),
        &client,
        "PACK_DOWNLOADED",
        &format!("Downloaded pack '{}' ({} images)", pack.name, images.len()),
    )
    .await;

    let filename = format!("{}_images.zip", pack.name.replace(' ', "_"));
    Ok(attachment(archive, "application/zip", &filename))
}

pub async fn download_all_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    current: CurrentUser,
) -> AppResult<Response> {
    let images = image::all_for_user(&state.pool, current.user.id).await?;
    if images.is_empty() {
        return Err(AppError::not_found("No images to download"));
    }

    let archive = build_zip(
        images
            .iter()
            .map(|image| (image.saved_filename.as_str(), image.image_data.as_slice())),
    )?;

    audit::record(
        &state.pool,
        Some(&current.user),
        &client,
        "ALL_IMAGES_DOWNLOADED",
        &format!("Downloaded all images ({} files)", images.len()),
    )
    .await;

    let filename = format!("imagehub_images_{}.zip", Utc::now().format("%Y%m%d_%H%M%S"));
    Ok(attachment(archive, "application/zip", &filename))
}

pub async fn delete_image_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    let image = image::find_summary(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Image not found"))?;
    if image.user_id != current.user.id && !current.user.is_admin {
        return Err(AppError::forbidden("Permission denied"));
    }

    image::delete(&state.pool, id).await?;
    audit::record(
        &state.pool,
        Some(&current.user),
        &client,
        "IMAGE_DELETED",
        &format!("Deleted {}", image.saved_filename),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "message": "Image deleted successfully",
    })))
}

pub async fn delete_pack_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    current: CurrentUser,
    Path(pack_id): Path<i64>,
) -> AppResult<Json<Value>> {
    let pack = pack::find(&state.pool, pack_id)
        .await?
        .ok_or_else(|| AppError::not_found("Pack not found"))?;
    let count = image::delete_pack_for_user(&state.pool, current.user.id, pack_id).await?;
    if count == 0 {
        return Err(AppError::not_found("No images found for this pack"));
    }

    audit::record(
        &state.pool,
        Some(&current.user),
        &client,
        "PACK_DELETED",
        &format!("Deleted pack '{}' ({} images)", pack.name, count),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "message": format!("Pack deleted successfully ({} images)", count),
    })))
}

pub async fn clear_all_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    current: CurrentUser,
) -> AppResult<Json<Value>> {
    let count = image::delete_all_for_user(&state.pool, current.user.id).await?;

    audit::record(
        &state.pool,
        Some(&current.user),
        &client,
        "ALL_IMAGES_DELETED",
        &format!("Cleared all images ({} files)", count),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "message": format!("All images cleared ({} files)", count),
    })))
}
