use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use gateway::providers::types::{FileAttachment, FilePayload};
use gateway::server::attachments::AttachmentPolicy;

const MIB: u64 = 1024 * 1024;

fn files(n: usize) -> Vec<FileAttachment> {
    (0..n)
        .map(|i| FileAttachment {
            name: format!("doc-{}.pdf", i),
            mime_type: if i % 7 == 0 {
                "application/zip".to_string()
            } else {
                "application/pdf".to_string()
            },
            size: (i as u64 % 12 + 1) * MIB,
            payload: FilePayload::Inline(String::new()),
        })
        .collect()
}

fn bench_validate(c: &mut Criterion) {
    let policy = AttachmentPolicy::default();
    let mut group = c.benchmark_group("attachment_validate");
    for n in [4usize, 16, 128] {
        let input = files(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &input, |b, input| {
            b.iter(|| policy.validate(black_box(input.clone())))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_validate);
criterion_main!(benches);
