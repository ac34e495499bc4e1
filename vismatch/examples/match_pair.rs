use image::ImageReader;
use std::time::Instant;
use vismatch::{
    image_from_dynamic, DistanceMetric, Image, ImageResult, MatcherConfig, Pipeline, PipelineConfig,
};

/// Synthetic textured scene, shifted right by `shift` pixels
fn synthetic(width: usize, height: usize, shift: usize) -> ImageResult<Image> {
    let data = (0..width * height)
        .map(|i| {
            let (x, y) = ((i % width + width - shift) % width, i / width);
            let block = ((x / 24) * 37 + (y / 24) * 11) % 5;
            (40 + block * 40 + (x + y) % 3) as u8
        })
        .collect();
    Image::gray(width, height, data)
}

fn load(path: &str) -> Result<Image, Box<dyn std::error::Error>> {
    let decoded = ImageReader::open(path)?.decode()?;
    Ok(image_from_dynamic(&decoded)?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔗 vismatch: matching an image pair");
    println!("===================================\n");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (query, train) = match args.as_slice() {
        [q, t, ..] => (load(q)?, load(t)?),
        _ => {
            println!("   No images given, using a synthetic pair (usage: match_pair <query> <train>)");
            (synthetic(320, 240, 0)?, synthetic(320, 240, 6)?)
        }
    };
    println!("📷 Query {}x{}, train {}x{}\n", query.width(), query.height(), train.width(), train.height());

    let configs = [
        ("ORB + ratio test", PipelineConfig::orb()),
        (
            "ORB + cross-check",
            PipelineConfig::orb()
                .with_matcher(MatcherConfig::binary().with_cross_check(true))
                .with_ratio_filter(false),
        ),
        ("Gradient + ratio test", PipelineConfig::gradient()),
        (
            "Gradient, L1 nearest",
            PipelineConfig::gradient()
                .with_matcher(MatcherConfig::new(DistanceMetric::L1))
                .with_ratio_filter(false),
        ),
    ];

    for (name, config) in configs {
        let mut pipeline = Pipeline::new(config)?;
        let start = Instant::now();
        let correspondences = pipeline.correspond(&query, &train)?;
        let elapsed = start.elapsed();

        println!("   {}: {:.2?}", name, elapsed);
        println!(
            "      {} / {} keypoints, {} matches",
            correspondences.query_keypoints.len(),
            correspondences.train_keypoints.len(),
            correspondences.len()
        );
        for (q, t, m) in correspondences.pairs().take(3) {
            println!(
                "      ({:>6.1}, {:>6.1}) -> ({:>6.1}, {:>6.1})  d={:.3}",
                q.x, q.y, t.x, t.y, m.distance
            );
        }
    }

    #[cfg(feature = "serde")]
    {
        println!("\n📋 Default pipeline configuration (TOML):");
        println!("{}", PipelineConfig::default().to_toml()?);
    }

    Ok(())
}
