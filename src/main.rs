use actix_identity::{CookieIdentityPolicy, Identity, IdentityService};
use actix_web::{error, middleware::Logger, web, App, HttpResponse, HttpServer};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use streamfront::catalog;
use streamfront::config::{Settings, DEFAULT_LOG_FILTER};
use streamfront::model::{Movie, MovieId, ProfileId, Session};
use streamfront::search::SearchIndex;
use streamfront::session::{decode_token, encode_token, SessionSlot};
use streamfront::{Context, Error, Page, Store};

type Tera = web::Data<tera::Tera>;
type Db = web::Data<sled::Db>;
type Config = web::Data<Settings>;
type Search = web::Data<SearchIndex>;

/// Keeps the session in the signed auth cookie.
struct CookieSlot<'a>(&'a Identity);

impl SessionSlot for CookieSlot<'_> {
    fn load(&self) -> streamfront::Result<Option<Session>> {
        Ok(self.0.identity().and_then(|token| decode_token(&token)))
    }

    fn save(&self, session: &Session) -> streamfront::Result<()> {
        self.0.remember(encode_token(session));
        Ok(())
    }

    fn clear(&self) -> streamfront::Result<()> {
        self.0.forget();
        Ok(())
    }
}

type WebStore<'a> = Store<sled::Db, CookieSlot<'a>>;

fn log_error<E: std::fmt::Debug>(err: E, message: &'static str) -> error::Error {
    debug!("{:?}", err);
    error::ErrorInternalServerError(message)
}

/// Message to show next to a form, or an internal error.
fn form_error(err: Error) -> actix_web::Result<String> {
    if err.is_user_facing() {
        Ok(err.to_string())
    } else {
        Err(log_error(err, "Internal error"))
    }
}

fn open_store<'a>(db: &Db, config: &Config, id: &'a Identity) -> actix_web::Result<WebStore<'a>> {
    let mut store = Store::new(db.get_ref().clone(), CookieSlot(id), config.credentials);
    store
        .restore_session()
        .map_err(|err| log_error(err, "Session error"))?;
    Ok(store)
}

fn redirect(location: &str) -> HttpResponse {
    HttpResponse::Found().header("location", location).finish()
}

/// Redirect for a request of `page` the current state may not see yet.
fn guard(store: &WebStore, page: Page) -> Option<HttpResponse> {
    let target = store.route(page);
    if target == page {
        None
    } else {
        Some(redirect(target.path()))
    }
}

fn render(tera: &Tera, template: &str, ctx: &tera::Context) -> actix_web::Result<HttpResponse> {
    let body = tera
        .render(template, ctx)
        .map_err(|err| log_error(err, "Template error"))?;
    Ok(HttpResponse::Ok().content_type("text/html").body(body))
}

async fn index(tera: Tera) -> actix_web::Result<HttpResponse> {
    render(&tera, "landing.html", &tera::Context::new())
}

async fn register(tera: Tera) -> actix_web::Result<HttpResponse> {
    render(&tera, "register.html", &tera::Context::new())
}

#[derive(Deserialize)]
struct RegisterParams {
    email: String,
    password: String,
    confirm_password: String,
}

async fn register_post(
    params: web::Form<RegisterParams>,
    id: Identity,
    tera: Tera,
    db: Db,
    config: Config,
) -> actix_web::Result<HttpResponse> {
    let mut store = open_store(&db, &config, &id)?;
    match store.register(&params.email, &params.password, &params.confirm_password) {
        Ok(_) => Ok(redirect("/login?registered")),
        Err(err) => {
            let mut ctx = tera::Context::new();
            ctx.insert("error", &form_error(err)?);
            ctx.insert("email", &params.email);
            render(&tera, "register.html", &ctx)
        }
    }
}

#[derive(Deserialize)]
struct LoginQuery {
    registered: Option<String>,
}

async fn login(query: web::Query<LoginQuery>, tera: Tera) -> actix_web::Result<HttpResponse> {
    let mut ctx = tera::Context::new();
    ctx.insert("registered", &query.registered.is_some());
    render(&tera, "login.html", &ctx)
}

#[derive(Deserialize)]
struct LoginParams {
    email: String,
    password: String,
}

async fn login_post(
    params: web::Form<LoginParams>,
    id: Identity,
    tera: Tera,
    db: Db,
    config: Config,
) -> actix_web::Result<HttpResponse> {
    let mut store = open_store(&db, &config, &id)?;
    match store.login(&params.email, &params.password) {
        Ok(_) => Ok(redirect(Page::Profiles.path())),
        Err(err) => {
            let mut ctx = tera::Context::new();
            ctx.insert("error", &form_error(err)?);
            ctx.insert("email", &params.email);
            ctx.insert("registered", &false);
            render(&tera, "login.html", &ctx)
        }
    }
}

fn profiles_page(
    tera: &Tera,
    store: &WebStore,
    error: Option<String>,
) -> actix_web::Result<HttpResponse> {
    let account = match store.context().account() {
        Some(account) => account,
        None => return Ok(redirect(Page::Login.path())),
    };
    let mut ctx = tera::Context::new();
    ctx.insert("email", &account.email);
    ctx.insert("profiles", store.list_profiles(account));
    ctx.insert("active", &store.context().profile().map(|profile| profile.id));
    ctx.insert("error", &error);
    render(tera, "profiles.html", &ctx)
}

async fn profiles(
    id: Identity,
    tera: Tera,
    db: Db,
    config: Config,
) -> actix_web::Result<HttpResponse> {
    let store = open_store(&db, &config, &id)?;
    if let Some(response) = guard(&store, Page::Profiles) {
        return Ok(response);
    }
    profiles_page(&tera, &store, None)
}

#[derive(Deserialize)]
struct ProfileParams {
    name: String,
}

async fn add_profile(
    params: web::Form<ProfileParams>,
    id: Identity,
    tera: Tera,
    db: Db,
    config: Config,
) -> actix_web::Result<HttpResponse> {
    let mut store = open_store(&db, &config, &id)?;
    if let Some(response) = guard(&store, Page::Profiles) {
        return Ok(response);
    }
    let mut account = match store.context().account() {
        Some(account) => account.clone(),
        None => return Ok(redirect(Page::Login.path())),
    };
    match store.add_profile(&mut account, &params.name) {
        Ok(_) => Ok(redirect(Page::Profiles.path())),
        Err(err) => {
            let message = form_error(err)?;
            profiles_page(&tera, &store, Some(message))
        }
    }
}

async fn select_profile(
    path: web::Path<ProfileId>,
    id: Identity,
    db: Db,
    config: Config,
) -> actix_web::Result<HttpResponse> {
    let mut store = open_store(&db, &config, &id)?;
    if let Some(response) = guard(&store, Page::Profiles) {
        return Ok(response);
    }
    let account = match store.context().account() {
        Some(account) => account.clone(),
        None => return Ok(redirect(Page::Login.path())),
    };
    let profile = match account.profile(path.into_inner()) {
        Some(profile) => profile.clone(),
        None => return Ok(redirect(Page::Profiles.path())),
    };
    store
        .select_profile(&account, &profile)
        .map_err(|err| log_error(err, "Session error"))?;
    Ok(redirect(Page::Home.path()))
}

#[derive(Serialize)]
struct MovieCard {
    movie: &'static Movie,
    favorite: bool,
}

#[derive(Serialize)]
struct Row {
    title: String,
    movies: Vec<MovieCard>,
}

#[derive(Deserialize)]
struct HomeQuery {
    q: Option<String>,
}

async fn home(
    query: web::Query<HomeQuery>,
    id: Identity,
    tera: Tera,
    db: Db,
    config: Config,
    search: Search,
) -> actix_web::Result<HttpResponse> {
    let store = open_store(&db, &config, &id)?;
    if let Some(response) = guard(&store, Page::Home) {
        return Ok(response);
    }
    let (profile, favorites) = match store.context() {
        Context::Active {
            profile, favorites, ..
        } => (profile, favorites),
        _ => return Ok(redirect(Page::Profiles.path())),
    };
    let card = |movie: &'static Movie| MovieCard {
        movie,
        favorite: favorites.contains(&movie.id),
    };

    let mut rows = Vec::new();
    let q = query.q.as_deref().map(str::trim).unwrap_or("");
    if q.is_empty() {
        let my_list = favorites
            .iter()
            .filter_map(|id| catalog::find(*id))
            .map(card)
            .collect::<Vec<_>>();
        if !my_list.is_empty() {
            rows.push(Row {
                title: "My List".to_owned(),
                movies: my_list,
            });
        }
        for (category, movies) in catalog::by_category() {
            rows.push(Row {
                title: category.to_owned(),
                movies: movies.into_iter().map(card).collect(),
            });
        }
    } else {
        let results = search
            .query(q)
            .map_err(|err| log_error(err, "Search error"))?
            .into_iter()
            .filter_map(|(id, _)| catalog::find(id))
            .map(card)
            .collect();
        rows.push(Row {
            title: format!("Results for \"{}\"", q),
            movies: results,
        });
    }

    let mut ctx = tera::Context::new();
    ctx.insert("profile", profile);
    ctx.insert("rows", &rows);
    ctx.insert("q", q);
    render(&tera, "home.html", &ctx)
}

async fn toggle_favorite(
    path: web::Path<MovieId>,
    id: Identity,
    db: Db,
    config: Config,
) -> actix_web::Result<HttpResponse> {
    let mut store = open_store(&db, &config, &id)?;
    if let Some(response) = guard(&store, Page::Home) {
        return Ok(response);
    }
    let (mut account, profile) = match store.context() {
        Context::Active {
            account, profile, ..
        } => (account.clone(), profile.clone()),
        _ => return Ok(redirect(Page::Profiles.path())),
    };
    match store.toggle_favorite(&mut account, &profile, path.into_inner()) {
        Ok(_) => Ok(redirect(Page::Home.path())),
        Err(err) if err.is_user_facing() => Err(error::ErrorBadRequest(err.to_string())),
        Err(err) => Err(log_error(err, "Database error")),
    }
}

async fn logout(id: Identity, db: Db, config: Config) -> actix_web::Result<HttpResponse> {
    let mut store = open_store(&db, &config, &id)?;
    store
        .logout()
        .map_err(|err| log_error(err, "Session error"))?;
    Ok(redirect(Page::Landing.path()))
}

fn io_error<E: std::fmt::Display>(err: E) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, err.to_string())
}

#[actix_rt::main]
async fn main() -> std::io::Result<()> {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", DEFAULT_LOG_FILTER);
    }
    env_logger::init();

    let settings = Settings::from_env();
    let db = settings.open_db().map_err(io_error)?;
    let search = SearchIndex::open(&db).map_err(io_error)?;
    let indexed = search
        .index_catalog(catalog::CATALOG)
        .map_err(io_error)?;
    info!("Indexed {} new catalog entries", indexed);
    let tera = tera::Tera::new(concat!(env!("CARGO_MANIFEST_DIR"), "/templates/**/*"))
        .map_err(io_error)?;

    let bind_addr = settings.bind_addr.clone();
    info!("Listening on {}", bind_addr);
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(IdentityService::new(
                CookieIdentityPolicy::new(&settings.cookie_key)
                    .name("auth-cookie")
                    .secure(false),
            ))
            .data(tera.clone())
            .data(db.clone())
            .data(settings.clone())
            .data(search.clone())
            .route("/", web::get().to(index))
            .route("/register", web::get().to(register))
            .route("/register", web::post().to(register_post))
            .route("/login", web::get().to(login))
            .route("/login", web::post().to(login_post))
            .route("/profiles", web::get().to(profiles))
            .route("/profiles", web::post().to(add_profile))
            .route("/profiles/{id}/select", web::post().to(select_profile))
            .route("/home", web::get().to(home))
            .route("/favorites/{id}", web::post().to(toggle_favorite))
            .route("/logout", web::get().to(logout))
    })
    .bind(bind_addr)?
    .run()
    .await
}
