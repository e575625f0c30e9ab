use conduit::db;

#[rocket::launch]
fn rocket() -> _ {
    let pool = db::init_pool().expect("failed to create database pool");
    {
        let mut connection = pool.get().expect("failed to check out a connection");
        db::run_migrations(&mut connection).expect("failed to run migrations");
    }
    conduit::build_rocket(pool)
}
