fn main() -> Result<(), Box<dyn std::error::Error>> {
    chimera::cli::main()
}
