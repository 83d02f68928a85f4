//! 并发测试：相互竞争的命名空间修改与共享容量

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use common::{allocator, mode, nlinks, scmfs};
use mm::ZoneTag;
use vfs::{FileSystem, FsError, Inode};

#[test]
fn test_racing_create_same_name() {
    let alloc = allocator(32, 16);
    let fs = scmfs(&alloc, "");
    let root = fs.root_inode().unwrap();
    let wins = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let root = root.clone();
            let wins = wins.clone();
            thread::spawn(move || {
                for round in 0..50 {
                    let name = format!("f{round}");
                    match root.create(&name, mode(0o644)) {
                        Ok(_) => {
                            wins.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => assert_eq!(e, FsError::AlreadyExists),
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(wins.load(Ordering::Relaxed), 50);
    assert_eq!(root.readdir().unwrap().len(), 50);
    assert_eq!(fs.usage().pool.in_use, 51);
}

#[test]
fn test_opposing_renames_do_not_deadlock() {
    let alloc = allocator(32, 16);
    let fs = scmfs(&alloc, "");
    let root = fs.root_inode().unwrap();
    let a = root.mkdir("a", mode(0o755)).unwrap();
    let b = root.mkdir("b", mode(0o755)).unwrap();
    let file = a.create("f", mode(0o644)).unwrap();
    let ino = file.metadata().unwrap().inode_no;

    // a/f -> b/g 与 b/g -> a/f 同时进行，两边的目录锁顺序相反
    let spawn = |from: Arc<dyn Inode>, old: &'static str, to: Arc<dyn Inode>, new: &'static str| {
        thread::spawn(move || {
            let mut moved = 0usize;
            for _ in 0..2000 {
                match from.rename(old, to.clone(), new) {
                    Ok(()) => moved += 1,
                    Err(FsError::NotFound) => {}
                    Err(e) => panic!("unexpected rename error {e:?}"),
                }
            }
            moved
        })
    };
    let t1 = spawn(a.clone(), "f", b.clone(), "g");
    let t2 = spawn(b.clone(), "g", a.clone(), "f");
    let forward = t1.join().unwrap();
    let backward = t2.join().unwrap();

    let in_a = a.lookup("f").is_ok();
    let in_b = b.lookup("g").is_ok();
    assert!(in_a ^ in_b);
    assert_eq!(in_b, forward == backward + 1);
    assert!(a.lookup("g").is_err() && b.lookup("f").is_err());
    assert_eq!(a.readdir().unwrap().len() + b.readdir().unwrap().len(), 1);

    let survivor = if in_a { a.lookup("f") } else { b.lookup("g") }.unwrap();
    assert_eq!(survivor.metadata().unwrap().inode_no, ino);
    assert_eq!(nlinks(&survivor), 1);
    assert_eq!(fs.usage().pool.in_use, 4);
}

#[test]
fn test_rmdir_races_with_create_inside() {
    let alloc = allocator(64, 16);
    let fs = scmfs(&alloc, "");
    let root = fs.root_inode().unwrap();

    for _ in 0..200 {
        let d = root.mkdir("d", mode(0o755)).unwrap();
        let remover = {
            let root = root.clone();
            thread::spawn(move || root.rmdir("d"))
        };
        let created = d.create("inner", mode(0o644));
        let removed = remover.join().unwrap();

        match (created, removed) {
            // 先创建：目录非空，删除失败
            (Ok(_), Err(FsError::DirectoryNotEmpty)) => {
                d.unlink("inner").unwrap();
                root.rmdir("d").unwrap();
            }
            // 先删除：目录已无链接，创建失败
            (Err(FsError::NotFound), Ok(())) => {}
            (created, removed) => panic!(
                "unexpected outcome: create {:?}, rmdir {:?}",
                created.err(),
                removed
            ),
        }
        assert_eq!(nlinks(&root), 2);
    }
    assert_eq!(fs.usage().pool.in_use, 1);
}

#[test]
fn test_concurrent_writers_share_capacity() {
    let alloc = allocator(32, 64);
    let fs = scmfs(&alloc, "size=40k");
    let root = fs.root_inode().unwrap();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let root = root.clone();
            thread::spawn(move || {
                let f = root.create(&format!("w{i}"), mode(0o644)).unwrap();
                let mut written = 0;
                for page in 0..8 {
                    match f.write_at(page * mm::PAGE_SIZE, &[i as u8; 64]) {
                        Ok(_) => written += 1,
                        Err(e) => assert_eq!(e, FsError::NoSpace),
                    }
                }
                written
            })
        })
        .collect();
    let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(total, 10);
    assert_eq!(fs.usage().data_pages, 10);
    assert_eq!(alloc.tag_stats(ZoneTag::Storage).used, 10);

    fs.umount().unwrap();
    assert_eq!(alloc.tag_stats(ZoneTag::Storage).used, 0);
}
