use divan::AllocProfiler;

#[global_allocator]
static ALLOC: AllocProfiler = AllocProfiler::system();

fn main() {
    divan::main();
}

fn sample(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| if i % 64 < 40 { b"NITRO-FS"[i % 8] } else { (i * 31) as u8 })
        .collect()
}

pub mod codec {
    use divan::Bencher;
    use nitro_fs::compression::{self, blz, CompressionKind};

    const LEN: usize = 0x4_0000;

    #[divan::bench(args = [CompressionKind::Lz77, CompressionKind::Lz11, CompressionKind::Rle])]
    fn decompress(bencher: Bencher, kind: CompressionKind) {
        bencher
            .with_inputs(|| compression::compress(kind, &super::sample(LEN)).unwrap())
            .bench_refs(|packed| {
                divan::black_box(compression::decompress_as(kind, packed).unwrap());
            });
    }

    #[divan::bench(args = [CompressionKind::Lz77, CompressionKind::Lz11, CompressionKind::Rle])]
    fn compress(bencher: Bencher, kind: CompressionKind) {
        bencher
            .with_inputs(|| super::sample(LEN))
            .bench_refs(|data| {
                divan::black_box(compression::compress(kind, data).unwrap());
            });
    }

    #[divan::bench]
    fn blz_decompress(bencher: Bencher) {
        bencher
            .with_inputs(|| blz::compress(&super::sample(LEN)))
            .bench_refs(|packed| {
                divan::black_box(blz::decompress(packed).unwrap());
            });
    }
}

pub mod load {
    use divan::Bencher;
    use nitro_fs::compression::{self, CompressionKind};
    use nitro_fs::rom::RomLayout;
    use nitro_fs::{FileSystem, FileSystemOptions};

    const ARCHIVES: usize = 64;

    fn narc(files: &[Vec<u8>]) -> Vec<u8> {
        let mut btaf = (files.len() as u32).to_le_bytes().to_vec();
        let mut gmif = Vec::new();
        for file in files {
            btaf.extend_from_slice(&(gmif.len() as u32).to_le_bytes());
            gmif.extend_from_slice(file);
            btaf.extend_from_slice(&(gmif.len() as u32).to_le_bytes());
        }
        let btnf = [4u32.to_le_bytes(), 0x0001_0000u32.to_le_bytes()].concat();

        let sections = [(b"BTAF", btaf), (b"BTNF", btnf), (b"GMIF", gmif)];
        let total = 16 + sections.iter().map(|(_, s)| 8 + s.len()).sum::<usize>();
        let mut out = b"NARC".to_vec();
        out.extend_from_slice(&0x0100_FFFEu32.to_le_bytes());
        out.extend_from_slice(&(total as u32).to_le_bytes());
        out.extend_from_slice(&[0x10, 0x00, 0x03, 0x00]);
        for (tag, section) in sections {
            out.extend_from_slice(tag);
            out.extend_from_slice(&(8 + section.len() as u32).to_le_bytes());
            out.extend_from_slice(&section);
        }
        out
    }

    /// Root folder holding `ARCHIVES` archives of LZ77 compressed files
    fn get_input() -> (Vec<u8>, RomLayout) {
        let packed = compression::compress(CompressionKind::Lz77, &super::sample(0x2000)).unwrap();
        let archive = narc(&vec![packed; 16]);

        let mut fnt = vec![8, 0, 0, 0, 0, 0, 1, 0];
        for i in 0..ARCHIVES {
            let name = format!("{i:03}.narc");
            fnt.push(name.len() as u8);
            fnt.extend_from_slice(name.as_bytes());
        }
        fnt.push(0);

        let data_start = fnt.len() + ARCHIVES * 8;
        let mut fat = Vec::new();
        let mut files = Vec::new();
        for _ in 0..ARCHIVES {
            fat.extend_from_slice(&((data_start + files.len()) as u32).to_le_bytes());
            files.extend_from_slice(&archive);
            fat.extend_from_slice(&((data_start + files.len()) as u32).to_le_bytes());
        }

        let layout = RomLayout::builder()
            .fnt(0..fnt.len())
            .fat(fnt.len()..data_start)
            .build();
        ([fnt, fat, files].concat(), layout)
    }

    #[divan::bench(args = [1, 4])]
    fn open(bencher: Bencher, workers: usize) {
        let options = FileSystemOptions::builder().workers(workers).build();
        bencher.with_inputs(get_input).bench_values(|(rom, layout)| {
            divan::black_box(FileSystem::with_layout(rom, layout, options).unwrap());
        });
    }

    #[divan::bench(sample_count = 10)]
    fn traverse(bencher: Bencher) {
        let (rom, layout) = get_input();
        let fs = FileSystem::with_layout(rom, layout, FileSystemOptions::default()).unwrap();
        bencher.bench_local(move || {
            divan::black_box(fs.traverse(0, true, true).unwrap());
        });
    }
}
