use criterion::{black_box, criterion_group, criterion_main, Criterion};

use sketchguard::event::{decode, Event, EventCode};
use sketchguard::extract::extract;
use sketchguard::profile::parse_profile;
use sketchguard::sketch::Cms;
use sketchguard::table::{FdEntry, ThreadEntry, ThreadTable};

const AT_FDCWD: i64 = -100;

fn openat_event(tid: i64) -> Event {
    Event::from_params(
        tid,
        EventCode::Openat,
        &[
            &7i64.to_le_bytes(),
            &AT_FDCWD.to_le_bytes(),
            b"logs/nethermind/trace.log\0",
            &0u32.to_le_bytes(),
        ],
    )
}

fn populated_table() -> ThreadTable {
    let mut table = ThreadTable::new();
    table.insert(ThreadEntry {
        tid: 1,
        pid: 1,
        comm: "systemd".into(),
        exe: "/sbin/init".into(),
        ..Default::default()
    });

    let mut entry = ThreadEntry {
        tid: 1337,
        pid: 1337,
        ptid: 1,
        sid: 1337,
        vpid: 1337,
        vpgid: 1337,
        comm: "nethermind".into(),
        exe: "/usr/bin/nethermind".into(),
        exe_path: "/usr/bin/nethermind".into(),
        cwd: "/var/lib/nethermind".into(),
        args: vec!["--config".into(), "mainnet".into(), "--datadir".into(), "data".into()],
        env: vec!["PATH=/usr/bin:/bin".into(), "HOME=/root".into()],
        lastevent_fd: 7,
        ..Default::default()
    };
    entry.fds.insert(
        7,
        FdEntry {
            name: "/var/lib/nethermind/logs/trace.log".into(),
            ino: 991,
            dev: 259,
            ..Default::default()
        },
    );
    table.insert(entry);
    table
}

fn bench_cms(c: &mut Criterion) {
    let cms = Cms::with_dims(5, 2048).expect("valid shape");
    let keys: Vec<String> = (0..256).map(|i| format!("/usr/bin/tool{i} --flag run")).collect();

    c.bench_function("cms/update", |b| {
        let mut i = 0usize;
        b.iter(|| {
            cms.update(black_box(keys[i % keys.len()].as_bytes()), 1);
            i += 1;
        })
    });

    c.bench_function("cms/estimate", |b| {
        let mut i = 0usize;
        b.iter(|| {
            let est = cms.estimate(black_box(keys[i % keys.len()].as_bytes()));
            i += 1;
            black_box(est)
        })
    });
}

fn bench_extract(c: &mut Criterion) {
    let table = populated_table();
    let evt = openat_event(1337);

    let proc_profile = parse_profile("%proc.name %proc.cmdline %proc.aname[2] %proc.sname");
    c.bench_function("extract/proc_profile", |b| {
        b.iter(|| extract(black_box(&evt), black_box(&table), black_box(&proc_profile)))
    });

    let fd_profile = parse_profile("%proc.name %fd.name %fd.ino");
    c.bench_function("extract/fd_profile_cached", |b| {
        b.iter(|| extract(black_box(&evt), black_box(&table), black_box(&fd_profile)))
    });

    // Unknown thread forces the raw-parameter fallback path.
    let fallback_evt = openat_event(9999);
    c.bench_function("extract/fd_profile_fallback", |b| {
        b.iter(|| extract(black_box(&fallback_evt), black_box(&table), black_box(&fd_profile)))
    });
}

fn bench_decode(c: &mut Criterion) {
    let evt = openat_event(1337);

    c.bench_function("decode/param_str", |b| {
        b.iter(|| decode::param_str(black_box(&evt), 2).expect("name param"))
    });

    c.bench_function("decode/param_i64", |b| {
        b.iter(|| decode::param_i64(black_box(&evt), 0).expect("fd param"))
    });
}

fn bench_suite(c: &mut Criterion) {
    bench_cms(c);
    bench_extract(c);
    bench_decode(c);
}

criterion_group!(benches, bench_suite);
criterion_main!(benches);
