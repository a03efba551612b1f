//! End-to-end scenarios against the public `RamDisk` facade, exercised both
//! through the typed methods and through the numbered dispatch table.
use ramdisk::{RamDisk, RdError, Request, Response};

fn opened() -> RamDisk {
    let fs = RamDisk::new();
    fs.init().unwrap();
    fs
}

#[test]
fn scenario_hello_world() {
    let fs = opened();
    fs.creat("/a").unwrap();
    let fd = fs.open(0, "/a").unwrap();
    assert_eq!(fs.write(0, fd, b"hello").unwrap(), 5);
    fs.lseek(0, fd, 0).unwrap();
    let mut buf = [0u8; 5];
    assert_eq!(fs.read(0, fd, &mut buf).unwrap(), 5);
    assert_eq!(&buf, b"hello");
}

#[test]
fn scenario_unlink_requires_empty_directory() {
    let fs = opened();
    fs.mkdir("/d").unwrap();
    fs.creat("/d/f").unwrap();
    assert_eq!(fs.unlink("/d").unwrap_err(), RdError::NotEmpty);
    fs.unlink("/d/f").unwrap();
    fs.unlink("/d").unwrap();
}

#[test]
fn scenario_inode_table_fills_up() {
    let fs = opened();
    for i in 0..1023 {
        fs.creat(&format!("/{i}")).unwrap();
    }
    assert_eq!(fs.creat("/one-more").unwrap_err(), RdError::NoSpace);
}

#[test]
fn scenario_file_grows_to_addressing_ceiling() {
    let fs = opened();
    fs.creat("/big").unwrap();
    let fd = fs.open(0, "/big").unwrap();
    let chunk = vec![0xABu8; 256];
    // 4168 blocks * 256 bytes = 1,067,008 bytes, the addressing ceiling.
    for _ in 0..4168 {
        fs.write(0, fd, &chunk).unwrap();
    }
    assert_eq!(fs.write(0, fd, &[0u8]).unwrap_err(), RdError::FileTooBig);
}

#[test]
fn scenario_unlink_refuses_while_open() {
    let fs = opened();
    fs.creat("/x").unwrap();
    let fd = fs.open(0, "/x").unwrap();
    assert_eq!(fs.unlink("/x").unwrap_err(), RdError::Busy);
    fs.close(0, fd).unwrap();
    fs.unlink("/x").unwrap();
}

#[test]
fn scenario_readdir_walks_a_fresh_then_populated_directory() {
    let fs = opened();
    fs.mkdir("/d").unwrap();
    let fd = fs.open(0, "/d").unwrap();
    assert!(fs.readdir(0, fd).unwrap().is_none());
    fs.close(0, fd).unwrap();

    fs.creat("/d/a").unwrap();
    fs.creat("/d/b").unwrap();
    let fd = fs.open(0, "/d").unwrap();
    let first = fs.readdir(0, fd).unwrap().unwrap();
    let second = fs.readdir(0, fd).unwrap().unwrap();
    assert_eq!((first.0.as_str(), second.0.as_str()), ("a", "b"));
    assert!(fs.readdir(0, fd).unwrap().is_none());
}

#[test]
fn round_trip_law_creat_then_unlink_is_a_no_op_on_counts() {
    let fs = opened();
    let before = fs.with_inner_free_counts();
    fs.creat("/tmp").unwrap();
    fs.unlink("/tmp").unwrap();
    assert_eq!(fs.with_inner_free_counts(), before);
}

#[test]
fn dispatch_table_reaches_every_operation() {
    let fs = opened();
    let resp = fs.dispatch(Request::Creat { path: "/via-dispatch" }).unwrap();
    assert!(matches!(resp, Response::Unit));

    let resp = fs.dispatch(Request::Open { client: 0, path: "/via-dispatch" }).unwrap();
    let fd = match resp {
        Response::Fd(fd) => fd,
        _ => panic!("expected Fd"),
    };

    let resp = fs.dispatch(Request::Write { client: 0, fd, data: b"ok" }).unwrap();
    assert!(matches!(resp, Response::ByteCount(2)));

    let resp = fs.dispatch(Request::Lseek { client: 0, fd, offset: 0 }).unwrap();
    assert!(matches!(resp, Response::Unit));

    let mut buf = [0u8; 2];
    let resp = fs.dispatch(Request::Read { client: 0, fd, buf: &mut buf }).unwrap();
    assert!(matches!(resp, Response::ByteCount(2)));
    assert_eq!(&buf, b"ok");

    let resp = fs.dispatch(Request::Close { client: 0, fd }).unwrap();
    assert!(matches!(resp, Response::Unit));

    let resp = fs.dispatch(Request::Unlink { path: "/via-dispatch" }).unwrap();
    assert!(matches!(resp, Response::Unit));
}

#[test]
fn second_init_through_dispatch_is_rejected() {
    let fs = opened();
    assert_eq!(fs.dispatch(Request::Init).unwrap_err(), RdError::AlreadyInitialized);
}

#[test]
fn name_length_boundary() {
    let fs = opened();
    fs.creat("/0123456789abc").unwrap(); // 13 characters, accepted
    assert_eq!(fs.creat("/0123456789abcd").unwrap_err(), RdError::InvalidArgument); // 14, rejected
}

#[test]
fn seek_boundary() {
    let fs = opened();
    fs.creat("/f").unwrap();
    let fd = fs.open(0, "/f").unwrap();
    fs.write(0, fd, b"abc").unwrap();
    fs.lseek(0, fd, 3).unwrap(); // seek to exactly size is accepted
    assert_eq!(fs.lseek(0, fd, 4).unwrap_err(), RdError::InvalidArgument); // size+1 rejected
}

#[test]
fn concurrent_creat_race_has_exactly_one_winner_and_consistent_counts() {
    use std::sync::Arc;
    use std::thread;

    let fs = Arc::new(opened());
    let before = fs.with_inner_free_counts();
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let fs = Arc::clone(&fs);
            thread::spawn(move || fs.creat("/contested").is_ok())
        })
        .collect();
    let wins = handles.into_iter().map(|h| h.join().unwrap()).filter(|&w| w).count();
    assert_eq!(wins, 1);

    fs.unlink("/contested").unwrap();
    assert_eq!(fs.with_inner_free_counts(), before);
}

#[test]
fn concurrent_unlink_is_refused_while_a_reader_has_the_file_open() {
    use std::sync::Arc;
    use std::thread;

    let fs = Arc::new(opened());
    fs.creat("/shared").unwrap();
    let fd = fs.open(0, "/shared").unwrap();
    fs.write(0, fd, &[0u8; 64]).unwrap();
    fs.lseek(0, fd, 0).unwrap();

    // The reader's open_count reservation outlives any single read call, so
    // a concurrent unlink must see it and back off for as long as the
    // descriptor stays open -- not just for the duration of one read.
    let reader = {
        let fs = Arc::clone(&fs);
        thread::spawn(move || {
            let mut buf = [0u8; 64];
            fs.read(0, fd, &mut buf).unwrap();
            assert_eq!(fs.unlink("/shared").unwrap_err(), RdError::Busy);
            fs.close(0, fd).unwrap();
        })
    };
    reader.join().unwrap();
    fs.unlink("/shared").unwrap();
}
