use khp_archive::hash_name;

pub struct HashNamesArgs {
    pub names: Vec<String>,
}

pub fn hash_names(args: HashNamesArgs) -> miette::Result<()> {
    for name in &args.names {
        println!("{:08x}  {}", hash_name(name), name);
    }
    Ok(())
}
