//! 命令行入口
//!
//! 用法: fw-digest-inject <firmware.bin> <firmware.elf>

use fw_digest_inject::{ImageDigest, Injector, Result};
use std::env;
use std::process;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() != 3 {
        print_usage(args.first().map(String::as_str).unwrap_or("fw-digest-inject"));
        process::exit(1);
    }

    // 日志输出到stderr，stdout只输出摘要
    if let Err(e) = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
    {
        eprintln!("日志初始化失败: {}", e);
    }

    match inject(&args[1], &args[2]) {
        Ok(digest) => println!("SHA256 Digest: {}", digest),
        Err(e) => {
            eprintln!("错误: {}", e);
            process::exit(1);
        }
    }
}

fn inject(binary_image: &str, linked_image: &str) -> Result<ImageDigest> {
    let injector = Injector::new(binary_image, linked_image);
    let report = injector.run()?;
    injector.verify(&report)
}

fn print_usage(program: &str) {
    eprintln!("用法: {} <firmware.bin> <firmware.elf>", program);
    eprintln!();
    eprintln!("  firmware.bin  固件二进制，末尾32字节预留给SHA256摘要");
    eprintln!("  firmware.elf  链接镜像，摘要写在第二个魔数标记之后16字节处");
}
