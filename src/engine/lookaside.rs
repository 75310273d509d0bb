use rusqlite::ffi;

/// Configure the lookaside allocator of a freshly opened connection.
///
/// Must run before any statement is prepared on `conn`; a slot size or count of zero
/// disables lookaside.
#[allow(unsafe_code)]
pub(crate) fn configure_lookaside(
    conn: &rusqlite::Connection,
    slot_size: i32,
    slot_count: i32,
) -> Result<(), rusqlite::Error> {
    // SAFETY: the raw handle stays valid while `conn` is borrowed, nothing else uses it
    // concurrently, and a null buffer asks SQLite to allocate the slots itself.
    let rc = unsafe {
        ffi::sqlite3_db_config(
            conn.handle(),
            ffi::SQLITE_DBCONFIG_LOOKASIDE,
            std::ptr::null_mut::<std::ffi::c_void>(),
            slot_size,
            slot_count,
        )
    };
    if rc == ffi::SQLITE_OK {
        Ok(())
    } else {
        Err(rusqlite::Error::SqliteFailure(
            ffi::Error::new(rc),
            Some(format!(
                "failed to configure lookaside ({slot_size} bytes x {slot_count} slots)"
            )),
        ))
    }
}
