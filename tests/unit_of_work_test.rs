use chrono::Utc;
use coupon_api::db::{self, Filter, Params, SqlValue, UnitOfWork};
use coupon_api::model::Coupon;
use tempfile::TempDir;

async fn setup_pool() -> (TempDir, db::Pool) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("uow.db").display());
    let pool = db::init_pool(&url, 4).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    (dir, pool)
}

async fn count(pool: &db::Pool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM coupons")
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn insert_raw(uow: &mut UnitOfWork, name: &str, percent: i32) -> Coupon {
    let now = Utc::now();
    uow.coupons()
        .raw_query(
            "INSERT INTO coupons (name, percent, is_active, created, last_updated)
             VALUES (@name, @percent, @active, @now, @now) RETURNING *",
            &Params::new()
                .bind("name", name)
                .bind("percent", percent)
                .bind("active", true)
                .bind("now", now),
            false,
        )
        .await
        .unwrap()
        .remove(0)
}

#[tokio::test]
async fn staged_adds_are_flushed_on_complete() {
    let (_dir, pool) = setup_pool().await;
    let mut uow = UnitOfWork::begin(&pool).await.unwrap();

    let mut coupons = uow.coupons();
    coupons.add(Coupon::new("10OFF", 10, true));
    coupons.add_range(vec![Coupon::new("20OFF", 20, true), Coupon::new("30OFF", 30, false)]);
    assert!(uow.has_changes());
    assert_eq!(count(&pool).await, 0);

    assert_eq!(uow.complete().await.unwrap(), 3);
    assert!(!uow.has_changes());
    assert_eq!(count(&pool).await, 3);

    let all = uow.coupons().get_all(None, false).await.unwrap();
    let names: Vec<&str> = all.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["10OFF", "20OFF", "30OFF"]);
    assert!(all.iter().all(|c| c.id > 0));

    // Nothing staged: completing again is a no-op.
    assert_eq!(uow.complete().await.unwrap(), 0);
}

#[tokio::test]
async fn tracked_mutation_persists_and_untracked_does_not() {
    let (_dir, pool) = setup_pool().await;
    let mut uow = UnitOfWork::begin(&pool).await.unwrap();
    let first = insert_raw(&mut uow, "FIRST", 10).await;
    let second = insert_raw(&mut uow, "SECOND", 20).await;

    let mut untracked = uow
        .coupons()
        .get(Filter::by_key::<Coupon>(first.id), false)
        .await
        .unwrap()
        .unwrap();
    untracked.percent = 99;
    assert!(uow.coupons().tracked_mut(first.id).is_none());

    let tracked = uow
        .coupons()
        .get(Filter::new("name = @name").bind("name", "SECOND"), true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tracked.id, second.id);
    {
        let mut coupons = uow.coupons();
        let entry = coupons.tracked_mut(second.id).unwrap();
        entry.percent = 25;
        entry.is_active = false;
    }

    assert_eq!(uow.complete().await.unwrap(), 1);

    let percents: Vec<(i64, i32, bool)> =
        sqlx::query_as("SELECT id, percent, is_active FROM coupons ORDER BY id")
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(percents, vec![(first.id, 10, true), (second.id, 25, false)]);

    // The snapshot was refreshed, so the same edit is not written twice.
    assert_eq!(uow.complete().await.unwrap(), 0);
}

#[tokio::test]
async fn tracked_lookup_returns_in_memory_state() {
    let (_dir, pool) = setup_pool().await;
    let mut uow = UnitOfWork::begin(&pool).await.unwrap();
    let coupon = insert_raw(&mut uow, "SAME", 10).await;

    uow.coupons()
        .get(Filter::by_key::<Coupon>(coupon.id), true)
        .await
        .unwrap();
    uow.coupons().tracked_mut(coupon.id).unwrap().name = "RENAMED".into();

    let again = uow
        .coupons()
        .get_all(Some(Filter::new("percent = @p").bind("p", 10)), true)
        .await
        .unwrap();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].name, "RENAMED");
}

#[tokio::test]
async fn removals_are_staged_until_complete() {
    let (_dir, pool) = setup_pool().await;
    let mut uow = UnitOfWork::begin(&pool).await.unwrap();
    let a = insert_raw(&mut uow, "A", 10).await;
    let b = insert_raw(&mut uow, "B", 20).await;
    let c = insert_raw(&mut uow, "C", 30).await;

    uow.coupons().remove(&a);
    assert_eq!(count(&pool).await, 3);
    assert_eq!(uow.complete().await.unwrap(), 1);
    assert!(uow
        .coupons()
        .get(Filter::by_key::<Coupon>(a.id), false)
        .await
        .unwrap()
        .is_none());

    uow.coupons().remove_range([&b, &c]);
    assert_eq!(uow.complete().await.unwrap(), 2);
    assert_eq!(count(&pool).await, 0);
}

#[tokio::test]
async fn removing_an_unflushed_add_cancels_it() {
    let (_dir, pool) = setup_pool().await;
    let mut uow = UnitOfWork::begin(&pool).await.unwrap();
    let pending = Coupon::new("GHOST", 5, true);

    let mut coupons = uow.coupons();
    coupons.add(pending.clone());
    coupons.remove(&pending);
    assert!(!uow.has_changes());
    assert_eq!(uow.complete().await.unwrap(), 0);
    assert_eq!(count(&pool).await, 0);
}

#[tokio::test]
async fn raw_helpers_report_counts_and_handle_null() {
    let (_dir, pool) = setup_pool().await;
    let mut uow = UnitOfWork::begin(&pool).await.unwrap();
    insert_raw(&mut uow, "SUMMER10", 10).await;
    insert_raw(&mut uow, "SUMMER20", 20).await;
    insert_raw(&mut uow, "WINTER", 30).await;

    let filter = "SELECT COUNT(*) FROM coupons WHERE @name IS NULL OR name LIKE '%' || @name || '%'";
    let all: Vec<i64> = uow
        .coupons()
        .raw_scalar_query(filter, &Params::new().bind("name", SqlValue::Null))
        .await
        .unwrap();
    assert_eq!(all, vec![3]);

    let summer: Vec<i64> = uow
        .coupons()
        .raw_scalar_query(filter, &Params::new().bind("name", Some("summer")))
        .await
        .unwrap();
    assert_eq!(summer, vec![2]);

    let updated = uow
        .coupons()
        .raw_execute(
            "UPDATE coupons SET is_active = @active WHERE percent >= @min",
            &Params::new().bind("active", false).bind("min", 20),
        )
        .await
        .unwrap();
    assert_eq!(updated, 2);

    let missing = uow
        .coupons()
        .raw_execute("DELETE FROM coupons WHERE id = @id", &Params::new().bind("id", 999_i64))
        .await
        .unwrap();
    assert_eq!(missing, 0);
}

#[tokio::test]
async fn transaction_rollback_discards_statements() {
    let (_dir, pool) = setup_pool().await;
    let mut uow = UnitOfWork::begin(&pool).await.unwrap();

    let mut scope = uow.transaction().await.unwrap();
    scope
        .coupons()
        .raw_execute(
            "INSERT INTO coupons (name, percent, is_active, created, last_updated)
             VALUES (@name, 10, 1, @now, @now)",
            &Params::new().bind("name", "TEMP").bind("now", Utc::now()),
        )
        .await
        .unwrap();
    scope.rollback().await.unwrap();
    assert_eq!(count(&pool).await, 0);

    // Dropping an uncommitted scope rolls back as well.
    {
        let mut scope = uow.transaction().await.unwrap();
        scope.coupons().add(Coupon::new("DROPPED", 10, true));
        assert_eq!(scope.complete().await.unwrap(), 1);
    }
    assert_eq!(count(&pool).await, 0);
}

#[tokio::test]
async fn transaction_commit_makes_changes_visible() {
    let (_dir, pool) = setup_pool().await;
    let mut uow = UnitOfWork::begin(&pool).await.unwrap();

    let mut scope = uow.transaction().await.unwrap();
    scope.coupons().add(Coupon::new("ATOMIC1", 10, true));
    scope.coupons().add(Coupon::new("ATOMIC2", 20, true));
    assert_eq!(scope.complete().await.unwrap(), 2);
    scope.commit().await.unwrap();

    assert_eq!(count(&pool).await, 2);
}

#[tokio::test]
async fn name_uniqueness_is_case_insensitive_in_storage() {
    let (_dir, pool) = setup_pool().await;
    let mut uow = UnitOfWork::begin(&pool).await.unwrap();
    insert_raw(&mut uow, "10OFF", 10).await;

    let err = uow
        .coupons()
        .raw_execute(
            "INSERT INTO coupons (name, percent, is_active, created, last_updated)
             VALUES (@name, 10, 1, @now, @now)",
            &Params::new().bind("name", "10off").bind("now", Utc::now()),
        )
        .await
        .unwrap_err();
    assert!(err.is_unique_violation());
}

#[tokio::test]
async fn missing_parameter_fails_before_execution() {
    let (_dir, pool) = setup_pool().await;
    let mut uow = UnitOfWork::begin(&pool).await.unwrap();
    let err = uow
        .coupons()
        .raw_query("SELECT * FROM coupons WHERE id = @id", &Params::new(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, db::DbError::MissingParameter { .. }));
}

#[tokio::test]
async fn rolled_back_scope_keeps_staged_changes_pending() {
    let (_dir, pool) = setup_pool().await;
    let mut uow = UnitOfWork::begin(&pool).await.unwrap();
    let existing = insert_raw(&mut uow, "KEEP", 10).await;

    let mut coupons = uow.coupons();
    coupons.add(Coupon::new("GHOST", 5, true));
    coupons.remove(&existing);

    let mut scope = uow.transaction().await.unwrap();
    assert_eq!(scope.complete().await.unwrap(), 2);
    let ghost_ids: Vec<i64> = scope
        .coupons()
        .raw_scalar_query("SELECT id FROM coupons WHERE name = 'GHOST'", &Params::new())
        .await
        .unwrap();
    assert_eq!(ghost_ids.len(), 1);
    scope.rollback().await.unwrap();

    assert_eq!(count(&pool).await, 1);
    assert!(uow.has_changes());
    assert!(uow.coupons().tracked_mut(ghost_ids[0]).is_none());

    // The staged add and remove still apply once completed for real.
    assert_eq!(uow.complete().await.unwrap(), 2);
    let names: Vec<String> = sqlx::query_scalar("SELECT name FROM coupons")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(names, vec!["GHOST".to_string()]);
}

#[tokio::test]
async fn changes_staged_inside_rolled_back_scope_are_discarded() {
    let (_dir, pool) = setup_pool().await;
    let mut uow = UnitOfWork::begin(&pool).await.unwrap();

    {
        let mut scope = uow.transaction().await.unwrap();
        scope.coupons().add(Coupon::new("TEMP", 10, true));
        assert_eq!(scope.complete().await.unwrap(), 1);
        let stored = scope.coupons().get_all(None, true).await.unwrap();
        assert_eq!(stored.len(), 1);
    }

    assert!(!uow.has_changes());
    assert!(uow.coupons().get_all(None, false).await.unwrap().is_empty());
    assert_eq!(uow.complete().await.unwrap(), 0);
}
